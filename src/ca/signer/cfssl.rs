//! A remote signer speaking the CFSSL `authsign` protocol.

use std::time::Duration;

use base64::prelude::*;
use bytes::Bytes;
use log::{debug, trace};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::commons::crypto::auth::AuthProvider;
use crate::commons::util::httpclient;
use crate::constants::SIGNER_AUTHSIGN_PATH;

use super::{RemoteSigner, SignRequest, SignerError};


//------------ CfsslSigner ---------------------------------------------------

/// Sends authenticated sign requests to a CFSSL server.
///
/// The sign request is serialized to JSON, authenticated with an HMAC
/// token and posted inside an envelope carrying both in base64.
#[derive(Debug)]
pub struct CfsslSigner {
    endpoint: String,
    auth: AuthProvider,
    client: Client,
}

impl CfsslSigner {
    pub fn new(
        base: &Url,
        auth: AuthProvider,
        timeout: Duration,
    ) -> Result<Self, SignerError> {
        let endpoint = Self::endpoint(base)?;
        let client = httpclient::client(&endpoint, timeout)?;
        Ok(CfsslSigner { endpoint, auth, client })
    }

    pub fn endpoint_uri(&self) -> &str {
        &self.endpoint
    }

    fn endpoint(base: &Url) -> Result<String, SignerError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(SIGNER_AUTHSIGN_PATH)
            .map(|uri| uri.to_string())
            .map_err(|e| SignerError::other(format!("invalid signer URI: {e}")))
    }
}

impl RemoteSigner for CfsslSigner {
    fn sign(&self, request: &SignRequest) -> Result<Bytes, SignerError> {
        let body = serde_json::to_vec(request).map_err(SignerError::other)?;
        let token = self.auth.token(&body)?;

        let envelope = AuthSignRequest {
            token: BASE64_STANDARD.encode(token),
            request: BASE64_STANDARD.encode(&body),
        };

        debug!(
            "requesting signature for serial {} from {}",
            request.serial(),
            self.endpoint
        );
        let response: AuthSignResponse = httpclient::post_json_with_response(
            &self.client,
            &self.endpoint,
            &envelope,
        )?;

        for message in &response.messages {
            trace!("signer message ({}): {}", message.code, message.message);
        }

        if !response.success {
            let (code, message) = response
                .errors
                .into_iter()
                .next()
                .map(|e| (e.code, e.message))
                .unwrap_or_else(|| (0, "no reason given".to_string()));
            return Err(SignerError::Refused { code, message });
        }

        Ok(response
            .result
            .map(|result| Bytes::from(result.certificate))
            .unwrap_or_default())
    }
}


//------------ Wire Types ----------------------------------------------------

#[derive(Debug, Serialize)]
struct AuthSignRequest {
    token: String,
    request: String,
}

#[derive(Debug, Deserialize)]
struct AuthSignResponse {
    success: bool,

    #[serde(default)]
    result: Option<SignResult>,

    #[serde(default)]
    errors: Vec<ResponseMessage>,

    #[serde(default)]
    messages: Vec<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct SignResult {
    #[serde(default)]
    certificate: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    code: i64,
    message: String,
}


//------------ Tests ---------------------------------------------------------
