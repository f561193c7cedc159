//! Common types used by the various issuer components.
pub mod api;
pub mod crypto;
pub mod error;
pub mod util;

//------------ Response Aliases ----------------------------------------------

pub type IssuerResult<T> = std::result::Result<T, self::error::Error>;
