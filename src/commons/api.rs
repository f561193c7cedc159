//! Data types exchanged between the issuer and its collaborators.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::commons::crypto::armor;
use crate::constants::PEM_LABEL_CERTIFICATE;
use crate::serial::SerialNumber;


//------------ IdentifierType ------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    Dns,
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IdentifierType::Dns => write!(f, "dns"),
        }
    }
}


//------------ Identifier ----------------------------------------------------

/// A name the policy authority is asked about.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    id_type: IdentifierType,
    value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Identifier { id_type: IdentifierType::Dns, value: value.into() }
    }

    pub fn id_type(&self) -> IdentifierType {
        self.id_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.id_type, self.value)
    }
}


//------------ CertificateStatus ---------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Valid,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CertificateStatus::Valid => write!(f, "valid"),
        }
    }
}


//------------ IssuedCertificate ---------------------------------------------

/// A certificate returned by the signer and recorded in storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IssuedCertificate {
    der: Bytes,
    status: CertificateStatus,
    serial: SerialNumber,
}

impl IssuedCertificate {
    pub fn new(der: Bytes, serial: SerialNumber) -> Self {
        IssuedCertificate { der, status: CertificateStatus::Valid, serial }
    }

    pub fn der(&self) -> &Bytes {
        &self.der
    }

    pub fn status(&self) -> CertificateStatus {
        self.status
    }

    /// The serial number the signer was asked to use.
    pub fn serial(&self) -> SerialNumber {
        self.serial
    }

    pub fn to_pem(&self) -> String {
        armor::encode(PEM_LABEL_CERTIFICATE, &self.der)
    }
}
