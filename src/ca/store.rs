//! Recording issued certificates.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::{error, fmt};

use bytes::Bytes;
use log::trace;
use tempfile::NamedTempFile;
use url::Url;

use crate::constants::CERTIFICATE_DIR;


//------------ StorageAuthority ----------------------------------------------

pub trait StorageAuthority: Send + Sync {
    /// Records a certificate and returns the id it is stored under.
    fn add_certificate(&self, der: &[u8]) -> Result<String, StorageError>;
}

/// Returns the id of a certificate: the hex SHA-256 digest of its DER.
pub fn certificate_id(der: &[u8]) -> String {
    hex::encode(openssl::sha::sha256(der))
}


//------------ CertificateStore ----------------------------------------------

/// The bundled storage authority.
#[derive(Clone, Debug)]
pub enum CertificateStore {
    Memory(MemoryCertificates),
    Disk(DiskCertificates),
}

impl CertificateStore {
    /// Creates a store for the given storage URI.
    ///
    /// Accepts the same schemes as the serial counter store.
    pub fn create(storage_uri: &Url) -> Result<Self, StorageError> {
        match storage_uri.scheme() {
            "local" | "file" => {
                let path = format!(
                    "{}{}",
                    storage_uri.host_str().unwrap_or_default(),
                    storage_uri.path()
                );
                Ok(CertificateStore::Disk(DiskCertificates::new(path)?))
            }
            "memory" => Ok(CertificateStore::Memory(MemoryCertificates::default())),
            scheme => Err(StorageError::Other(format!(
                "unknown storage scheme '{scheme}'"
            ))),
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        match self {
            CertificateStore::Memory(memory) => Ok(memory.get(id)),
            CertificateStore::Disk(disk) => disk.get(id),
        }
    }
}

impl StorageAuthority for CertificateStore {
    fn add_certificate(&self, der: &[u8]) -> Result<String, StorageError> {
        match self {
            CertificateStore::Memory(memory) => Ok(memory.add(der)),
            CertificateStore::Disk(disk) => disk.add(der),
        }
    }
}

impl From<MemoryCertificates> for CertificateStore {
    fn from(memory: MemoryCertificates) -> Self {
        CertificateStore::Memory(memory)
    }
}

impl From<DiskCertificates> for CertificateStore {
    fn from(disk: DiskCertificates) -> Self {
        CertificateStore::Disk(disk)
    }
}


//------------ MemoryCertificates --------------------------------------------

/// Certificates kept in memory. Clones share the same certificates.
#[derive(Clone, Debug, Default)]
pub struct MemoryCertificates {
    certs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryCertificates {
    pub fn add(&self, der: &[u8]) -> String {
        let id = certificate_id(der);
        self.certs
            .write()
            .expect("poisoned lock")
            .insert(id.clone(), Bytes::copy_from_slice(der));
        id
    }

    pub fn get(&self, id: &str) -> Option<Bytes> {
        self.certs.read().expect("poisoned lock").get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.certs.read().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


//------------ DiskCertificates ----------------------------------------------

/// Certificates stored as `certificates/$(id).der` under a base directory.
///
/// Storing the same certificate twice is harmless since the file name is
/// derived from the content.
#[derive(Clone, Debug)]
pub struct DiskCertificates {
    root: PathBuf,
    tmp: PathBuf,
}

impl DiskCertificates {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base = base.into();
        let root = base.join(CERTIFICATE_DIR);
        let tmp = base.join(".tmp");

        for dir in [&root, &tmp] {
            fs::create_dir_all(dir).map_err(|err| {
                StorageError::io(
                    format!("failed to create directory '{}'", dir.display()),
                    err,
                )
            })?;
        }

        Ok(DiskCertificates { root, tmp })
    }

    pub fn add(&self, der: &[u8]) -> Result<String, StorageError> {
        let id = certificate_id(der);
        let path = self.root.join(format!("{id}.der"));

        let mut tmp_file = NamedTempFile::new_in(&self.tmp).map_err(|err| {
            StorageError::io(format!("writing temp file failed for '{id}'"), err)
        })?;
        tmp_file.write_all(der).map_err(|err| {
            StorageError::io(format!("failed to write temp file for '{id}'"), err)
        })?;
        tmp_file.as_file().sync_all().map_err(|err| {
            StorageError::io(format!("failed to sync temp file for '{id}'"), err)
        })?;
        tmp_file.persist(&path).map_err(|err| {
            StorageError::io(
                format!(
                    "failed to rename temp file '{}' to '{}'",
                    err.file.path().display(),
                    path.display()
                ),
                err.error,
            )
        })?;

        trace!("stored certificate {id}");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(None);
        }

        let path = self.root.join(format!("{id}.der"));
        match fs::read(&path) {
            Ok(der) => Ok(Some(der.into())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(
                format!("failed to read file '{}'", path.display()),
                err,
            )),
        }
    }
}


//------------ StorageError --------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
    Other(String),
}

impl StorageError {
    pub fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        StorageError::Io { context: context.into(), err }
    }

    pub fn other(msg: impl fmt::Display) -> Self {
        StorageError::Other(msg.to_string())
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageError::Io { context, err } => write!(f, "{context}: {err}"),
            StorageError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl error::Error for StorageError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            StorageError::Io { err, .. } => Some(err),
            StorageError::Other(_) => None,
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test;

    #[test]
    fn id_is_sha256_hex() {
        assert_eq!(
            certificate_id(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn memory_store() {
        let memory = MemoryCertificates::default();
        let store = CertificateStore::from(memory.clone());

        let id = store.add_certificate(b"\x30\x00").unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(store.get(&id).unwrap().unwrap().as_ref(), b"\x30\x00");
        assert!(store.get("00").unwrap().is_none());
    }

    #[test]
    fn disk_store_survives_a_new_instance() {
        test::test_under_tmp(|dir| {
            let uri = Url::parse(&format!("local://{}", dir.display())).unwrap();
            let id = CertificateStore::create(&uri)
                .unwrap()
                .add_certificate(b"\x30\x01\x00")
                .unwrap();

            assert!(dir.join("certificates").join(format!("{id}.der")).is_file());

            let reopened = CertificateStore::create(&uri).unwrap();
            assert_eq!(reopened.get(&id).unwrap().unwrap().as_ref(), b"\x30\x01\x00");
            assert!(reopened.get("../../etc/passwd").unwrap().is_none());
        });
    }

    #[test]
    fn reject_unknown_scheme() {
        let uri = Url::parse("s3://bucket/issuer").unwrap();
        assert!(matches!(
            CertificateStore::create(&uri),
            Err(StorageError::Other(_))
        ));
    }
}
