//! Defines all issuance errors.
//!
//! Each variant aborts the issuance attempt it occurs in. Nothing here is
//! retried by the issuer itself.

use std::{error, fmt};

use crate::ca::policy::PolicyError;
use crate::ca::signer::SignerError;
use crate::ca::store::StorageError;
use crate::commons::crypto::CsrError;
use crate::serial;

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // Request Issues, nothing was done
    //-----------------------------------------------------------------
    InvalidCsr(CsrError),

    MissingHostname,

    PolicyRejection {
        name: String,
        reason: PolicyError,
    },

    //-----------------------------------------------------------------
    // Serial Allocation
    //-----------------------------------------------------------------
    Serial(serial::Error),

    //-----------------------------------------------------------------
    // Signer Issues, the serial transaction was rolled back
    //-----------------------------------------------------------------
    Signing(SignerError),

    EmptyResponse,

    InvalidCertificate(String),

    //-----------------------------------------------------------------
    // Storage Issues, rolled back but the certificate exists at the signer
    //-----------------------------------------------------------------
    Storage(StorageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidCsr(err) => write!(f, "Invalid CSR: {err}"),
            Error::MissingHostname => {
                write!(f, "Cannot issue a certificate without a hostname.")
            }
            Error::PolicyRejection { name, .. } => {
                write!(f, "Policy forbids issuing for name {name}")
            }
            Error::Serial(err) => write!(f, "Cannot allocate serial: {err}"),
            Error::Signing(err) => write!(f, "Signing issue: {err}"),
            Error::EmptyResponse => write!(f, "No certificate returned by server"),
            Error::InvalidCertificate(msg) => {
                write!(f, "Invalid certificate value returned: {msg}")
            }
            Error::Storage(err) => {
                write!(f, "Cannot store issued certificate: {err}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidCsr(err) => Some(err),
            Error::PolicyRejection { reason, .. } => Some(reason),
            Error::Serial(err) => Some(err),
            Error::Signing(err) => Some(err),
            Error::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    pub fn policy_rejection(name: &str, reason: PolicyError) -> Self {
        Error::PolicyRejection { name: name.to_string(), reason }
    }

    /// Returns the name the policy authority refused, if that is what
    /// went wrong.
    pub fn rejected_name(&self) -> Option<&str> {
        match self {
            Error::PolicyRejection { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<CsrError> for Error {
    fn from(err: CsrError) -> Self {
        Error::InvalidCsr(err)
    }
}

impl From<serial::Error> for Error {
    fn from(err: serial::Error) -> Self {
        Error::Serial(err)
    }
}

impl From<SignerError> for Error {
    fn from(err: SignerError) -> Self {
        Error::Signing(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = Error::policy_rejection("evil.com", PolicyError::new("blocked"));
        assert_eq!(err.to_string(), "Policy forbids issuing for name evil.com");
        assert_eq!(err.rejected_name(), Some("evil.com"));

        assert_eq!(
            Error::MissingHostname.to_string(),
            "Cannot issue a certificate without a hostname."
        );
        assert!(Error::EmptyResponse.rejected_name().is_none());
    }
}
