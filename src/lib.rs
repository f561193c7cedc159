//! The _Issuer_ library crate.

pub mod ca;
pub mod commons;
pub mod config;
pub mod constants;
pub mod serial;
