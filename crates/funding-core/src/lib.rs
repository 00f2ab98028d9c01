//! Core types shared by every funding source backend
//!
//! This crate has no I/O. It defines the normalized results every backend
//! returns and the error taxonomy backends use internally.

pub mod errors;
pub mod types;

pub use errors::FundingError;
pub use types::{
    DescriptionHash, InvoiceDescription, InvoiceResponse, PaymentResponse, PaymentStatus,
};
