//! The certificate authority: turns certificate requests into certificates.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};

use crate::ca::audit::{AuditLogger, LogAuditLogger};
use crate::ca::policy::PolicyAuthority;
use crate::ca::signer::{RemoteSigner, SignRequest};
use crate::ca::store::StorageAuthority;
use crate::commons::api::{Identifier, IssuedCertificate};
use crate::commons::crypto::{armor, CertificateRequest};
use crate::commons::error::Error;
use crate::commons::IssuerResult;
use crate::config::{Config, ConfigError};
use crate::constants::PEM_LABEL_CERTIFICATE;
use crate::serial::{SerialAllocator, SerialNumber, ShardPrefix};


//------------ CertificateAuthority ------------------------------------------

/// Issues certificates for a single signer profile.
///
/// Every issuance runs in its own serial transaction. Once the transaction
/// has begun, any failure rolls it back so that the next certificate gets
/// the serial the failed attempt had. Only one issuance can be in progress
/// at a time, also across authorities sharing the serial counters: a
/// concurrent call fails with a serial error rather than waiting.
///
/// If storing a certificate fails, the certificate has already been signed
/// with a serial that is then handed out again. The signer side is not
/// told about this. The failure is reported as an audit error so that it
/// can be dealt with manually.
pub struct CertificateAuthority {
    profile: String,
    serials: SerialAllocator,
    signer: Arc<dyn RemoteSigner>,
    storage: Arc<dyn StorageAuthority>,
    policy: Arc<dyn PolicyAuthority>,
    log: Arc<dyn AuditLogger>,
}

impl CertificateAuthority {
    pub fn new(
        profile: impl Into<String>,
        serials: SerialAllocator,
        signer: Arc<dyn RemoteSigner>,
        storage: Arc<dyn StorageAuthority>,
        policy: Arc<dyn PolicyAuthority>,
        log: Arc<dyn AuditLogger>,
    ) -> Self {
        log.notice("Certificate Authority Starting");
        CertificateAuthority {
            profile: profile.into(),
            serials,
            signer,
            storage,
            policy,
            log,
        }
    }

    /// Builds an authority with the collaborators from the config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let serials = SerialAllocator::new(config.serial_prefix, config.counter_store()?);
        let ca = CertificateAuthority::new(
            config.signer.profile.clone(),
            serials,
            config.remote_signer()?,
            Arc::new(config.certificate_store()?),
            Arc::new(config.policy()),
            Arc::new(LogAuditLogger),
        );
        info!(
            "issuing with profile '{}' for serial prefix {}",
            ca.profile, config.serial_prefix
        );
        Ok(ca)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// The shard prefix of the serials this authority issues.
    pub fn serial_prefix(&self) -> ShardPrefix {
        self.serials.prefix()
    }

    /// Returns whether an issuance is currently in progress.
    ///
    /// The serial transaction itself is never handed out.
    pub fn is_issuing(&self) -> bool {
        self.serials.is_active()
    }

    /// Issues a certificate for the request.
    ///
    /// The common name defaults to the first DNS name and the DNS names
    /// default to the common name. All names must be acceptable to the
    /// policy authority before a serial is allocated.
    pub fn issue_certificate(
        &self,
        csr: &CertificateRequest,
    ) -> IssuerResult<IssuedCertificate> {
        let (common_name, hosts) = self.names(csr)?;
        self.check_policy(&common_name, &hosts)?;

        let csr_pem = csr.to_pem();

        self.serials.begin()?;
        self.log.notice(&format!(
            "Issuing certificate for {common_name} with profile {}",
            self.profile
        ));

        match self.sign_and_store(common_name, hosts, csr_pem) {
            Ok(cert) => {
                self.serials.commit()?;
                debug!("issued certificate with serial {}", cert.serial());
                Ok(cert)
            }
            Err(err) => {
                if let Err(rollback_err) = self.serials.rollback() {
                    warn!("Could not roll back serial transaction: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    fn names(
        &self,
        csr: &CertificateRequest,
    ) -> IssuerResult<(String, Vec<String>)> {
        let mut hosts = csr.dns_names().to_vec();

        let common_name = if !csr.common_name().is_empty() {
            csr.common_name().to_string()
        } else if let Some(first) = hosts.first() {
            first.clone()
        } else {
            let err = Error::MissingHostname;
            self.log.warning(&err.to_string());
            return Err(err);
        };

        if hosts.is_empty() {
            hosts.push(common_name.clone());
        }

        Ok((common_name, hosts))
    }

    fn check_policy(&self, common_name: &str, hosts: &[String]) -> IssuerResult<()> {
        let names = std::iter::once(common_name).chain(hosts.iter().map(String::as_str));

        for name in names {
            if let Err(reason) = self.policy.willing_to_issue(&Identifier::dns(name)) {
                self.log.audit_err(&format!(
                    "Policy forbids issuing for name {name}: {reason}"
                ));
                return Err(Error::policy_rejection(name, reason));
            }
        }
        Ok(())
    }

    /// Everything that happens inside the serial transaction.
    fn sign_and_store(
        &self,
        common_name: String,
        hosts: Vec<String>,
        csr_pem: String,
    ) -> IssuerResult<IssuedCertificate> {
        let counter = self.serials.increment_and_get_serial()?;
        let serial = SerialNumber::new(self.serials.prefix(), counter)?;

        let request = SignRequest::new(
            hosts,
            csr_pem,
            common_name,
            self.profile.clone(),
            serial,
        );

        let pem = self.signer.sign(&request).map_err(|err| {
            self.log.warning(&format!("Signing failed for serial {serial}: {err}"));
            Error::Signing(err)
        })?;

        if pem.is_empty() {
            let err = Error::EmptyResponse;
            self.log.warning(&err.to_string());
            return Err(err);
        }

        let der = armor::decode(PEM_LABEL_CERTIFICATE, &pem).map_err(|err| {
            let err = Error::InvalidCertificate(err.to_string());
            self.log.warning(&err.to_string());
            err
        })?;

        let cert = IssuedCertificate::new(Bytes::from(der), serial);

        let id = self.storage.add_certificate(cert.der()).map_err(|err| {
            self.log.audit_err(&format!(
                "Certificate with serial {serial} was signed but not stored, \
                 serial will be reused: {err}"
            ));
            Error::Storage(err)
        })?;
        debug!("stored certificate with serial {serial} as {id}");

        Ok(cert)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ca::signer::SignerError;
    use crate::ca::store::{CertificateStore, MemoryCertificates};
    use crate::serial::store::MemoryCounters;
    use crate::test::{self, AuditLevel, ListPolicy, RecordingAuditLogger, StaticSigner};

    struct Fixture {
        counters: MemoryCounters,
        signer: Arc<StaticSigner>,
        policy: Arc<ListPolicy>,
        log: Arc<RecordingAuditLogger>,
        ca: CertificateAuthority,
    }

    fn fixture(signer: StaticSigner, rejected: &[&str]) -> Fixture {
        let counters = MemoryCounters::default();
        let signer = Arc::new(signer);
        let policy = Arc::new(ListPolicy::rejecting(rejected));
        let log = Arc::new(RecordingAuditLogger::default());
        let ca = CertificateAuthority::new(
            "ee",
            SerialAllocator::new(ShardPrefix::new(1), counters.clone().into()),
            signer.clone(),
            Arc::new(CertificateStore::from(MemoryCertificates::default())),
            policy.clone(),
            log.clone(),
        );
        Fixture { counters, signer, policy, log, ca }
    }

    fn counter(fixture: &Fixture) -> u64 {
        fixture.counters.get(ShardPrefix::new(1))
    }

    #[test]
    fn startup_is_logged() {
        let fixture = fixture(StaticSigner::returning_certificate(), &[]);
        assert_eq!(
            fixture.log.events(),
            [(AuditLevel::Notice, "Certificate Authority Starting".to_string())]
        );
    }

    #[test]
    fn common_name_defaults_to_first_dns_name() {
        let fixture = fixture(StaticSigner::returning_certificate(), &[]);
        let csr = CertificateRequest::new(
            Bytes::from_static(b"\x30\x00"),
            "",
            vec!["a.example".into(), "b.example".into()],
        );

        fixture.ca.issue_certificate(&csr).unwrap();

        let requests = fixture.signer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].common_name(), "a.example");
        assert_eq!(requests[0].hosts(), ["a.example", "b.example"]);
        assert_eq!(requests[0].profile(), "ee");
        assert!(requests[0].csr_pem().starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
    }

    #[test]
    fn dns_names_default_to_common_name() {
        let fixture = fixture(StaticSigner::returning_certificate(), &[]);
        let csr = CertificateRequest::new(Bytes::new(), "cn.example", vec![]);

        fixture.ca.issue_certificate(&csr).unwrap();

        assert_eq!(fixture.signer.requests()[0].hosts(), ["cn.example"]);
        assert_eq!(
            fixture.policy.checked(),
            [Identifier::dns("cn.example"), Identifier::dns("cn.example")]
        );
    }

    #[test]
    fn missing_hostname_consults_nobody() {
        let fixture = fixture(StaticSigner::returning_certificate(), &[]);
        let csr = CertificateRequest::new(Bytes::new(), "", vec![]);

        assert!(matches!(
            fixture.ca.issue_certificate(&csr),
            Err(Error::MissingHostname)
        ));
        assert!(fixture.policy.checked().is_empty());
        assert_eq!(fixture.signer.calls(), 0);
        assert!(!fixture.ca.is_issuing());
        assert!(fixture.log.contains(AuditLevel::Warning, "without a hostname"));
    }

    #[test]
    fn first_rejected_name_is_reported() {
        let fixture = fixture(StaticSigner::returning_certificate(), &["b.example"]);
        let csr = CertificateRequest::new(
            Bytes::new(),
            "a.example",
            vec!["a.example".into(), "b.example".into(), "c.example".into()],
        );

        let err = fixture.ca.issue_certificate(&csr).unwrap_err();
        assert_eq!(err.rejected_name(), Some("b.example"));
        assert_eq!(fixture.policy.checked().len(), 3);
        assert_eq!(fixture.signer.calls(), 0);
        assert_eq!(counter(&fixture), 0);
        assert!(fixture.log.contains(AuditLevel::AuditErr, "b.example"));
    }

    #[test]
    fn counter_held_elsewhere_is_left_alone() {
        let fixture = fixture(StaticSigner::returning_certificate(), &[]);
        let csr = CertificateRequest::new(Bytes::new(), "busy.example", vec![]);

        let other = SerialAllocator::new(ShardPrefix::new(1), fixture.counters.clone().into());
        other.begin().unwrap();
        other.increment_and_get_serial().unwrap();

        assert!(matches!(
            fixture.ca.issue_certificate(&csr),
            Err(Error::Serial(crate::serial::Error::AlreadyActive))
        ));
        assert!(other.is_active());
        assert!(!fixture.ca.is_issuing());
        assert_eq!(fixture.signer.calls(), 0);
        assert_eq!(counter(&fixture), 1);

        other.commit().unwrap();
        let cert = fixture.ca.issue_certificate(&csr).unwrap();
        assert_eq!(cert.serial().counter(), 2);
    }

    #[test]
    fn signer_failure_rolls_back() {
        let fixture = fixture(StaticSigner::failing("connection refused"), &[]);
        let csr = CertificateRequest::new(Bytes::new(), "fail.example", vec![]);

        assert!(matches!(
            fixture.ca.issue_certificate(&csr),
            Err(Error::Signing(SignerError::Other(_)))
        ));
        assert_eq!(fixture.signer.requests()[0].serial().to_string(), "0100000000000001");
        assert_eq!(counter(&fixture), 0);
        assert!(!fixture.ca.is_issuing());
        assert!(fixture.log.contains(AuditLevel::Warning, "connection refused"));
    }

    #[test]
    fn certificate_carries_serial_and_der() {
        let der = test::certificate_der("ok.example");
        let signer = StaticSigner::returning(armor::encode(PEM_LABEL_CERTIFICATE, &der));
        let fixture = fixture(signer, &[]);
        let csr = CertificateRequest::new(Bytes::new(), "ok.example", vec![]);

        let first = fixture.ca.issue_certificate(&csr).unwrap();
        let second = fixture.ca.issue_certificate(&csr).unwrap();

        assert_eq!(first.serial().to_string(), "0100000000000001");
        assert_eq!(second.serial().to_string(), "0100000000000002");
        assert_eq!(first.der().as_ref(), der.as_slice());
        assert_eq!(counter(&fixture), 2);
    }
}
