//! Certificate signing requests as presented by subscribers.

use std::fmt;

use bytes::Bytes;
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::{Decode, Encode, Tag, Tagged};
use x509_cert::ext::pkix::{SubjectAltName, name::GeneralName};
use x509_cert::name::Name;
use x509_cert::request::{CertReq, ExtensionReq};

use crate::commons::crypto::armor::{self, ArmorError};
use crate::constants::{PEM_LABEL_CSR, PEM_LABEL_CSR_LEGACY};

/// The id-at-commonName attribute type.
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");


//------------ CertificateRequest --------------------------------------------

/// A parsed certificate signing request.
///
/// Keeps the original DER encoding, which is what gets forwarded to the
/// signer, together with the names the issuer needs for its own checks.
/// The signature on the request is not verified here; the signer does
/// that.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateRequest {
    raw: Bytes,
    common_name: String,
    dns_names: Vec<String>,
}

impl CertificateRequest {
    /// Creates a request from already extracted parts.
    pub fn new(
        raw: impl Into<Bytes>,
        common_name: impl Into<String>,
        dns_names: Vec<String>,
    ) -> Self {
        CertificateRequest {
            raw: raw.into(),
            common_name: common_name.into(),
            dns_names,
        }
    }

    /// Decodes a DER encoded PKCS#10 request.
    ///
    /// The common name is taken from the last CN attribute in the subject
    /// and is empty if there is none. A T.61 common name must be ASCII. The DNS names come from a subject
    /// alternative name extension in the requested extensions, in the order
    /// they appear.
    pub fn decode(der: &[u8]) -> Result<Self, CsrError> {
        let req = CertReq::from_der(der).map_err(CsrError::decode)?;
        let common_name = common_name(&req.info.subject)?;
        let dns_names = dns_names(&req)?;

        Ok(CertificateRequest {
            raw: Bytes::copy_from_slice(der),
            common_name,
            dns_names,
        })
    }

    /// Decodes a PEM encoded request.
    pub fn from_pem(data: &[u8]) -> Result<Self, CsrError> {
        let der = match armor::decode(PEM_LABEL_CSR, data) {
            Ok(der) => der,
            Err(ArmorError::UnexpectedLabel { found, .. })
                if found == PEM_LABEL_CSR_LEGACY =>
            {
                armor::decode(PEM_LABEL_CSR_LEGACY, data)?
            }
            Err(err) => return Err(err.into()),
        };
        Self::decode(&der)
    }

    /// The DER encoding of the request.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn to_pem(&self) -> String {
        armor::encode(PEM_LABEL_CSR, &self.raw)
    }
}

fn common_name(subject: &Name) -> Result<String, CsrError> {
    let mut common_name = String::new();

    for rdn in subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid != COMMON_NAME {
                continue;
            }
            common_name = match atv.value.tag() {
                Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
                    std::str::from_utf8(atv.value.value())
                        .map_err(|_| {
                            CsrError::Unsupported("common name is not UTF-8".into())
                        })?
                        .to_string()
                }
                // T.61 only agrees with UTF-8 on ASCII.
                Tag::TeletexString if atv.value.value().is_ascii() => {
                    String::from_utf8_lossy(atv.value.value()).into_owned()
                }
                Tag::TeletexString => {
                    return Err(CsrError::Unsupported(
                        "common name is a non-ASCII T.61 string".into(),
                    ))
                }
                tag => {
                    return Err(CsrError::Unsupported(format!(
                        "common name encoded as {tag}"
                    )))
                }
            };
        }
    }

    Ok(common_name)
}

fn dns_names(req: &CertReq) -> Result<Vec<String>, CsrError> {
    let mut names = Vec::new();

    for attr in req.info.attributes.iter() {
        if attr.oid != ExtensionReq::OID {
            continue;
        }
        for value in attr.values.iter() {
            let encoded = value.to_der().map_err(CsrError::decode)?;
            let extensions =
                ExtensionReq::from_der(&encoded).map_err(CsrError::decode)?;

            for ext in extensions.0.iter() {
                if ext.extn_id != SubjectAltName::OID {
                    continue;
                }
                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())
                    .map_err(CsrError::decode)?;
                for name in san.0.iter() {
                    if let GeneralName::DnsName(dns) = name {
                        names.push(dns.to_string());
                    }
                }
            }
        }
    }

    Ok(names)
}


//------------ CsrError ------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CsrError {
    Armor(ArmorError),
    Decode(String),
    Unsupported(String),
}

impl CsrError {
    fn decode(err: impl fmt::Display) -> Self {
        CsrError::Decode(err.to_string())
    }
}

impl fmt::Display for CsrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CsrError::Armor(err) => write!(f, "{err}"),
            CsrError::Decode(msg) => write!(f, "cannot decode request: {msg}"),
            CsrError::Unsupported(msg) => write!(f, "unsupported request: {msg}"),
        }
    }
}

impl std::error::Error for CsrError {}

impl From<ArmorError> for CsrError {
    fn from(err: ArmorError) -> Self {
        CsrError::Armor(err)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test;

    #[test]
    fn decode_names() {
        let der = test::csr_der(Some("example.com"), &["example.com", "www.example.com"]);
        let csr = CertificateRequest::decode(&der).unwrap();

        assert_eq!(csr.common_name(), "example.com");
        assert_eq!(csr.dns_names(), ["example.com", "www.example.com"]);
        assert_eq!(csr.raw().as_ref(), der.as_slice());
    }

    #[test]
    fn decode_without_san() {
        let der = test::csr_der(Some("only-cn.example"), &[]);
        let csr = CertificateRequest::decode(&der).unwrap();

        assert_eq!(csr.common_name(), "only-cn.example");
        assert!(csr.dns_names().is_empty());
    }

    #[test]
    fn decode_without_cn() {
        let der = test::csr_der(None, &["san-only.example"]);
        let csr = CertificateRequest::decode(&der).unwrap();

        assert_eq!(csr.common_name(), "");
        assert_eq!(csr.dns_names(), ["san-only.example"]);
    }

    #[test]
    fn pem_round_trip() {
        let der = test::csr_der(Some("pem.example"), &["pem.example"]);
        let csr = CertificateRequest::decode(&der).unwrap();

        let pem = csr.to_pem();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----\n"));
        assert_eq!(CertificateRequest::from_pem(pem.as_bytes()).unwrap(), csr);
    }

    #[test]
    fn accept_legacy_label() {
        let der = test::csr_der(Some("legacy.example"), &[]);
        let pem = armor::encode(PEM_LABEL_CSR_LEGACY, &der);

        let csr = CertificateRequest::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(csr.common_name(), "legacy.example");
    }

    #[test]
    fn teletex_common_name_must_be_ascii() {
        let der = test::teletex_csr_der("t61.example");
        let csr = CertificateRequest::decode(&der).unwrap();
        assert_eq!(csr.common_name(), "t61.example");

        let der = test::teletex_csr_der("café.example");
        assert!(matches!(
            CertificateRequest::decode(&der),
            Err(CsrError::Unsupported(_))
        ));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            CertificateRequest::decode(b"\x30\x03\x02\x01\x01"),
            Err(CsrError::Decode(_))
        ));

        let pem = armor::encode("CERTIFICATE", b"\x30\x00");
        assert!(matches!(
            CertificateRequest::from_pem(pem.as_bytes()),
            Err(CsrError::Armor(ArmorError::UnexpectedLabel { .. }))
        ));
    }
}
