pub mod bolt11;
pub mod funding_source;
pub mod http;
pub mod lnd_rest;
pub mod lnpay;
pub mod lntxbot;
pub mod void;
