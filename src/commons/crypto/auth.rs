//! Shared key authentication of signing requests.
//!
//! A token is the HMAC-SHA256 over the serialized request followed by
//! optional additional data, keyed with a secret shared with the signer.

use std::{env, fmt, fs};

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::memcmp;
use openssl::pkey::PKey;
use openssl::sign::Signer;


//------------ AuthProvider --------------------------------------------------

#[derive(Clone)]
pub struct AuthProvider {
    key: Vec<u8>,
    additional: Option<Vec<u8>>,
}

impl AuthProvider {
    /// Creates a provider from a key specification.
    ///
    /// The key is given as hex, or as `env:VAR` to read the hex from an
    /// environment variable, or as `file:PATH` to read it from a file.
    /// Surrounding whitespace is ignored.
    pub fn new(key: &str, additional: Option<Vec<u8>>) -> Result<Self, AuthError> {
        let hex_key = if let Some(var) = key.strip_prefix("env:") {
            env::var(var).map_err(|e| {
                AuthError::KeySource(format!("cannot read variable '{var}': {e}"))
            })?
        } else if let Some(path) = key.strip_prefix("file:") {
            fs::read_to_string(path).map_err(|e| {
                AuthError::KeySource(format!("cannot read file '{path}': {e}"))
            })?
        } else {
            key.to_string()
        };

        let key = hex::decode(hex_key.trim())
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        if key.is_empty() {
            return Err(AuthError::InvalidKey("key is empty".into()));
        }

        Ok(AuthProvider { key, additional })
    }

    /// Computes the token for the given request bytes.
    pub fn token(&self, request: &[u8]) -> Result<Vec<u8>, AuthError> {
        let pkey = PKey::hmac(&self.key)?;
        let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
        signer.update(request)?;
        if let Some(additional) = &self.additional {
            signer.update(additional)?;
        }
        Ok(signer.sign_to_vec()?)
    }

    /// Checks a token in constant time.
    pub fn verify(&self, request: &[u8], token: &[u8]) -> bool {
        match self.token(request) {
            Ok(expected) => {
                expected.len() == token.len() && memcmp::eq(&expected, token)
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthProvider")
            .field("key", &"<redacted>")
            .field("additional", &self.additional.as_ref().map(Vec::len))
            .finish()
    }
}


//------------ AuthError -----------------------------------------------------

#[derive(Debug)]
pub enum AuthError {
    InvalidKey(String),
    KeySource(String),
    Crypto(ErrorStack),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::InvalidKey(msg) => write!(f, "invalid auth key: {msg}"),
            AuthError::KeySource(msg) => write!(f, "cannot load auth key: {msg}"),
            AuthError::Crypto(err) => write!(f, "cannot compute auth token: {err}"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Crypto(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ErrorStack> for AuthError {
    fn from(err: ErrorStack) -> Self {
        AuthError::Crypto(err)
    }
}


//------------ Tests ---------------------------------------------------------
