//! Some helper functions for HTTP calls
use std::{env, fmt, fs, time::Duration};

use reqwest::{
    blocking::{Client, ClientBuilder, Response},
    header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
    StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::constants::{ISSUER_HTTPS_ROOT_CERTS_ENV, ISSUER_VERSION};

const JSON_CONTENT: &str = "application/json";

/// Performs a POST of data that can be serialized into json, and expects
/// a json response that can be deserialized into an owned value of the
/// expected type.
///
/// Services that report failures inside a JSON body do so with a non-OK
/// status, so a body that parses is returned regardless of the status.
/// Any other non-OK response becomes an error that includes the body.
#[allow(clippy::result_large_err)]
pub fn post_json_with_response<T: DeserializeOwned>(
    client: &Client,
    uri: &str,
    data: impl Serialize,
) -> Result<T, Error> {
    let body = serde_json::to_string(&data)
        .map_err(|e| Error::request_build_json(uri, e))?;

    let res = client
        .post(uri)
        .headers(headers(uri, Some(JSON_CONTENT))?)
        .body(body)
        .send()
        .map_err(|e| Error::execute(uri, e))?;

    process_json_response(uri, res)
}

/// Default client for talking to the signer.
#[allow(clippy::result_large_err)]
pub fn client(uri: &str, timeout: Duration) -> Result<Client, Error> {
    let mut builder = ClientBuilder::new().timeout(timeout);

    if let Ok(cert_list) = env::var(ISSUER_HTTPS_ROOT_CERTS_ENV) {
        for path in cert_list.split(':') {
            let cert = load_root_cert(path)?;
            builder = builder.add_root_certificate(cert);
        }
    }

    if uri.starts_with("https://localhost")
        || uri.starts_with("https://127.0.0.1")
    {
        builder.danger_accept_invalid_certs(true).build()
    } else {
        builder.build()
    }
    .map_err(|e| Error::request_build(uri, e))
}

#[allow(clippy::result_large_err)]
fn load_root_cert(path: &str) -> Result<reqwest::Certificate, Error> {
    let pem = fs::read(path)
        .map_err(|e| Error::request_build_https_cert(path, e))?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| Error::request_build_https_cert(path, e))
}

#[allow(clippy::result_large_err)]
fn headers(
    uri: &str,
    content_type: Option<&str>,
) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&format!("issuer/{ISSUER_VERSION}"))
        .map_err(|e| Error::request_build(uri, e))?;
    headers.insert(USER_AGENT, user_agent);

    if let Some(content_type) = content_type {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .map_err(|e| Error::request_build(uri, e))?,
        );
    }
    Ok(headers)
}

#[allow(clippy::result_large_err)]
fn process_json_response<T: DeserializeOwned>(
    uri: &str,
    res: Response,
) -> Result<T, Error> {
    let status = res.status();
    let body = res
        .text()
        .map_err(|e| Error::response(uri, format!("cannot get body: {e}")))?;

    if body.is_empty() {
        return Err(if status == StatusCode::OK {
            Error::response(uri, "got empty response body")
        } else {
            Error::response_unexpected_status(uri, status)
        });
    }

    match serde_json::from_str(&body) {
        Ok(res) => Ok(res),
        Err(e) if status == StatusCode::OK => Err(Error::response(
            uri,
            format!("could not parse JSON response: {e}"),
        )),
        Err(_) => Err(Error::ErrorResponseWithBody(uri.to_string(), status, body)),
    }
}


//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type RootCertPath = String;
type ErrorMessage = String;

#[derive(Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestBuildHttpsCert(RootCertPath, ErrorMessage),

    RequestExecute(ErrorUri, ErrorMessage),

    Response(ErrorUri, ErrorMessage),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => {
                write!(f, "Issue creating request for URI: {uri}, error: {msg}")
            }
            Error::RequestBuildHttpsCert(path, msg) => write!(
                f,
                "Cannot use configured HTTPS root cert '{path}'. Error: {msg}"
            ),
            Error::RequestExecute(uri, msg) => {
                write!(f, "Issue accessing URI: {uri}, error: {msg}")
            }
            Error::Response(uri, msg) => write!(
                f,
                "Issue processing response from URI: {uri}, error: {msg}"
            ),
            Error::ErrorResponseWithBody(uri, code, e) => write!(
                f,
                "Error response from URI: {uri}, Status: {code}, Error: {e}"
            ),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn request_build_json(uri: &str, e: impl fmt::Display) -> Self {
        Error::RequestBuild(
            uri.to_string(),
            format!("could not serialize type to JSON: {e}"),
        )
    }

    pub fn request_build_https_cert(path: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuildHttpsCert(path.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn response_unexpected_status(uri: &str, status: StatusCode) -> Self {
        Error::Response(uri.to_string(), format!("unexpected status code {status}"))
    }
}
