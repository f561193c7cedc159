//! The remote signer that turns certificate requests into certificates.

mod cfssl;
pub use self::cfssl::CfsslSigner;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::commons::crypto::auth::AuthError;
use crate::commons::util::httpclient;
use crate::serial::SerialNumber;


//------------ RemoteSigner --------------------------------------------------

/// A signer holding the CA key.
///
/// Implementations block until the signer answers or fails.
pub trait RemoteSigner: Send + Sync {
    /// Signs the request and returns the certificate as PEM.
    ///
    /// An empty result is returned as is; judging it is up to the caller.
    fn sign(&self, request: &SignRequest) -> Result<Bytes, SignerError>;
}


//------------ SignRequest ---------------------------------------------------

/// What the issuer asks the signer to sign.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignRequest {
    hosts: Vec<String>,

    #[serde(rename = "certificate_request")]
    csr_pem: String,

    subject: Subject,

    profile: String,

    #[serde(rename = "serial_sequence")]
    serial: SerialNumber,
}

impl SignRequest {
    pub fn new(
        hosts: Vec<String>,
        csr_pem: String,
        common_name: String,
        profile: String,
        serial: SerialNumber,
    ) -> Self {
        SignRequest {
            hosts,
            csr_pem,
            subject: Subject { common_name },
            profile,
            serial,
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    pub fn common_name(&self) -> &str {
        &self.subject.common_name
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn serial(&self) -> SerialNumber {
        self.serial
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct Subject {
    #[serde(rename = "CN")]
    common_name: String,
}


//------------ SignerError ---------------------------------------------------

#[derive(Debug)]
pub enum SignerError {
    /// The request could not be authenticated.
    Auth(AuthError),

    /// The signer could not be reached or answered nonsense.
    Http(httpclient::Error),

    /// The signer refused the request.
    Refused { code: i64, message: String },

    /// Anything else, including failures of test signers.
    Other(String),
}

impl SignerError {
    pub fn other(msg: impl fmt::Display) -> Self {
        SignerError::Other(msg.to_string())
    }
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignerError::Auth(err) => write!(f, "{err}"),
            SignerError::Http(err) => write!(f, "{err}"),
            SignerError::Refused { code, message } => {
                write!(f, "signer refused request ({code}): {message}")
            }
            SignerError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for SignerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignerError::Auth(err) => Some(err),
            SignerError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AuthError> for SignerError {
    fn from(err: AuthError) -> Self {
        SignerError::Auth(err)
    }
}

impl From<httpclient::Error> for SignerError {
    fn from(err: httpclient::Error) -> Self {
        SignerError::Http(err)
    }
}


//------------ Tests ---------------------------------------------------------
