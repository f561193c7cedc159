//! The certificate authority and its collaborators.

pub mod audit;
pub mod authority;
pub mod policy;
pub mod signer;
pub mod store;

pub use self::authority::CertificateAuthority;
