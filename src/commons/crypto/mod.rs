//! Cryptographic helpers: CSR decoding, PEM armor and request
//! authentication.
pub mod armor;
pub mod auth;

mod csr;
pub use self::csr::*;
