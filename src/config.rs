//! Configuration of the issuer.

use std::{env, fmt, fs, io};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use serde::de;
use serde::{Deserialize, Deserializer};
use url::Url;

#[cfg(unix)]
use syslog::Facility;

use crate::ca::policy::HostnamePolicy;
use crate::ca::signer::{CfsslSigner, RemoteSigner};
use crate::ca::store::CertificateStore;
use crate::commons::crypto::auth::AuthProvider;
use crate::constants::{ISSUER_ENV_LOG_LEVEL, SIGNER_DEFAULT_TIMEOUT_SECS};
use crate::serial::{CounterStore, ShardPrefix};


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn serial_prefix() -> ShardPrefix {
        ShardPrefix::new(1)
    }

    fn log_level() -> LevelFilter {
        match env::var(ISSUER_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {ISSUER_ENV_LOG_LEVEL}, using info"
                    );
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    #[cfg(unix)]
    fn syslog_facility() -> Facility {
        Facility::LOG_DAEMON
    }

    fn signer_profile() -> String {
        "ee".to_string()
    }

    fn signer_timeout_seconds() -> u64 {
        SIGNER_DEFAULT_TIMEOUT_SECS
    }
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_storage_uri")]
    pub storage_uri: Url,

    #[serde(default = "ConfigDefaults::serial_prefix")]
    pub serial_prefix: ShardPrefix,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    pub log_file: Option<PathBuf>,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "crate::commons::util::ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[cfg(unix)]
    #[serde(
        default = "ConfigDefaults::syslog_facility",
        deserialize_with = "crate::commons::util::ext_serde::de_facility"
    )]
    pub syslog_facility: Facility,

    pub signer: SignerConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

/// # Accessing the collaborators
impl Config {
    /// Creates the store for the serial counters.
    pub fn counter_store(&self) -> Result<CounterStore, ConfigError> {
        CounterStore::create(&self.storage_uri).map_err(|e| {
            ConfigError::Other(format!("Cannot create serial counter store: {e}"))
        })
    }

    /// Creates the store for issued certificates.
    pub fn certificate_store(&self) -> Result<CertificateStore, ConfigError> {
        CertificateStore::create(&self.storage_uri).map_err(|e| {
            ConfigError::Other(format!("Cannot create certificate store: {e}"))
        })
    }

    /// Creates the remote signer.
    ///
    /// This loads the auth key, so it fails if the key is referenced
    /// through an unset variable or a missing file.
    pub fn remote_signer(&self) -> Result<Arc<dyn RemoteSigner>, ConfigError> {
        let auth = AuthProvider::new(&self.signer.auth_key, None)
            .map_err(|e| ConfigError::Other(format!("Invalid signer auth_key: {e}")))?;
        let signer = CfsslSigner::new(
            &self.signer.uri,
            auth,
            Duration::from_secs(self.signer.timeout_seconds),
        )
        .map_err(|e| ConfigError::Other(format!("Cannot create signer: {e}")))?;
        Ok(Arc::new(signer))
    }

    pub fn policy(&self) -> HostnamePolicy {
        HostnamePolicy::new(&self.policy.blocked_names)
    }
}

/// # Parsing and verifying
impl Config {
    pub fn parse(file_path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(file_path)
            .map_err(|e| ConfigError::Io(file_path.to_path_buf(), e))?;
        Self::parse_str(&s)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s).map_err(ConfigError::Toml)?;
        config.verify()?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        match self.signer.uri.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ConfigError::Other(format!(
                    "signer uri must use http or https, found '{scheme}'"
                )))
            }
        }

        if self.signer.profile.is_empty() {
            return Err(ConfigError::other("signer profile must not be empty"));
        }

        if self.signer.timeout_seconds == 0 {
            return Err(ConfigError::other(
                "signer timeout_seconds must be at least 1",
            ));
        }

        if self.signer.auth_key.trim().is_empty() {
            return Err(ConfigError::other("signer auth_key must be set"));
        }

        if self.log_type == LogType::File && self.log_file.is_none() {
            return Err(ConfigError::other(
                "log_file not configured with log_type = \"file\"",
            ));
        }

        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(),
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    fn file_logger(&self) -> Result<(), ConfigError> {
        let path = self.log_file.as_ref().ok_or(ConfigError::other(
            "log_file not configured with log_type = \"file\"",
        ))?;
        let log_file = fern::log_file(path).map_err(|e| {
            ConfigError::Other(format!(
                "Failed to open log file '{}': {}",
                path.display(),
                e
            ))
        })?;

        self.fern_logger().chain(log_file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {e}"))
        })
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init stderr logging: {e}"))
        })
    }

    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("issuer"));
        let formatter = syslog::Formatter3164 {
            facility: self.syslog_facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger().chain(logger).apply().map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {e}"))
                })
            }
            Err(err) => Err(ConfigError::Other(format!(
                "Cannot connect to syslog: {err}"
            ))),
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is only supported on Unix systems"))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;

        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
    }
}

fn deserialize_storage_uri<'de, D>(d: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    match Url::parse(&string) {
        Ok(uri) => Ok(uri),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            // a plain path
            Url::parse(&format!("local://{string}")).map_err(de::Error::custom)
        }
        Err(err) => Err(de::Error::custom(format!(
            "invalid storage_uri '{string}': {err}"
        ))),
    }
}


//------------ SignerConfig --------------------------------------------------

#[derive(Clone, Deserialize)]
pub struct SignerConfig {
    /// The base URI of the signer.
    pub uri: Url,

    /// The shared key: hex, `env:VAR` or `file:PATH`.
    pub auth_key: String,

    #[serde(default = "ConfigDefaults::signer_profile")]
    pub profile: String,

    #[serde(default = "ConfigDefaults::signer_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let auth_key = if self.auth_key.starts_with("env:")
            || self.auth_key.starts_with("file:")
        {
            self.auth_key.as_str()
        } else {
            "<redacted>"
        };
        f.debug_struct("SignerConfig")
            .field("uri", &self.uri.as_str())
            .field("auth_key", &auth_key)
            .field("profile", &self.profile)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}


//------------ PolicyConfig --------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PolicyConfig {
    /// Names that must not be issued for, including all their subdomains.
    #[serde(default)]
    pub blocked_names: Vec<String>,
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{string}\""
            ))),
        }
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Toml(toml::de::Error),
    Other(String),
}

impl ConfigError {
    pub fn other(msg: impl fmt::Display) -> Self {
        ConfigError::Other(msg.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => write!(
                f,
                "Could not read config file '{}': {}",
                path.display(),
                err
            ),
            ConfigError::Toml(err) => write!(f, "Error parsing config file: {err}"),
            ConfigError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, err) => Some(err),
            ConfigError::Toml(err) => Some(err),
            ConfigError::Other(_) => None,
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ca::authority::CertificateAuthority;
    use crate::test;

    const MINIMAL: &str = r#"
        storage_uri = "memory:"

        [signer]
        uri = "http://localhost:8888/"
        auth_key = "0123456789abcdef"
    "#;

    #[test]
    fn parse_default_config_file() {
        let config = Config::parse_str(include_str!("../defaults/issuer.conf")).unwrap();

        assert_eq!(config.storage_uri.as_str(), "local:///var/lib/issuer/");
        assert_eq!(config.serial_prefix, ShardPrefix::new(1));
        assert_eq!(config.log_type, LogType::Stderr);
        assert_eq!(config.signer.profile, "ee");
        assert_eq!(config.signer.timeout_seconds, 30);
        assert!(config.policy.blocked_names.is_empty());
    }

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = Config::parse_str(MINIMAL).unwrap();

        assert_eq!(config.storage_uri.scheme(), "memory");
        assert_eq!(config.serial_prefix, ShardPrefix::new(1));
        assert_eq!(config.signer.profile, "ee");
        assert_eq!(config.signer.timeout_seconds, SIGNER_DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn plain_path_is_local_storage() {
        let config = Config::parse_str(&format!(
            "storage_uri = \"/var/lib/other\"\n{}",
            MINIMAL.replace("storage_uri = \"memory:\"", "")
        ))
        .unwrap();
        assert_eq!(config.storage_uri.as_str(), "local:///var/lib/other");
    }

    #[test]
    fn reject_invalid_config() {
        let check = |from: &str, to: &str| {
            let s = MINIMAL.replace(from, to);
            assert!(Config::parse_str(&s).is_err(), "accepted: {s}");
        };
        check("http://localhost", "ftp://localhost");
        check("storage_uri", "data_dir");
        check("auth_key", "profile = \"\"\nauth_key");
        check("[signer]", "log_type = \"file\"\n[signer]");
        check("[signer]", "log_type = \"journal\"\n[signer]");
        check("[signer]", "log_level = \"loud\"\n[signer]");
        check("[signer]", "serial_prefix = 256\n[signer]");
        check("auth_key = \"0123456789abcdef\"", "auth_key = \"\"");
        check("auth_key = \"0123456789abcdef\"", "");
        assert!(Config::parse_str(&format!("{MINIMAL}\ntimeout_seconds = 0")).is_err());
    }

    #[test]
    fn build_collaborators_from_disk_config() {
        test::test_under_tmp(|dir| {
            let config = Config::parse_str(&format!(
                "storage_uri = \"local://{}\"\nserial_prefix = 7\n{}",
                dir.display(),
                MINIMAL.replace("storage_uri = \"memory:\"", "")
            ))
            .unwrap();

            assert!(matches!(config.counter_store().unwrap(), CounterStore::Disk(_)));
            assert!(matches!(
                config.certificate_store().unwrap(),
                CertificateStore::Disk(_)
            ));

            let ca = CertificateAuthority::from_config(&config).unwrap();
            assert_eq!(ca.serial_prefix(), ShardPrefix::new(7));
            assert_eq!(ca.profile(), "ee");
            assert!(dir.join("serial").is_dir());
            assert!(dir.join("certificates").is_dir());
        });
    }

    #[test]
    fn bad_auth_key_fails_at_signer_creation() {
        let config = Config::parse_str(
            &MINIMAL.replace("0123456789abcdef", "file:/nonexistent/issuer.key"),
        )
        .unwrap();
        assert!(config.remote_signer().is_err());
    }

    #[test]
    fn debug_hides_inline_key() {
        let config = Config::parse_str(MINIMAL).unwrap();
        assert!(!format!("{config:?}").contains("0123456789abcdef"));
    }
}
