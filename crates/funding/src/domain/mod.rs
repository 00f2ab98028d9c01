pub mod settlements;
