//! Various issuer-wide constants.


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `issuer` binary.
pub const ISSUER_APP: &str = "Issuer";

/// The version of the crate, as set in Cargo.toml.
pub const ISSUER_VERSION: &str = env!("CARGO_PKG_VERSION");


//------------ Config Files Paths -------------------------------------------

/// The default path to the issuer config file.
pub const ISSUER_DEFAULT_CONFIG_FILE: &str = "/etc/issuer.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const ISSUER_ENV_LOG_LEVEL: &str = "ISSUER_LOG_LEVEL";

/// The environment variable with extra HTTPS root certificates.
///
/// A colon separated list of paths to PEM files whose certificates are
/// trusted when talking to the remote signer.
pub const ISSUER_HTTPS_ROOT_CERTS_ENV: &str = "ISSUER_HTTPS_ROOT_CERTS";


//------------ PEM Labels ---------------------------------------------------

/// The PEM label used for certificate signing requests.
pub const PEM_LABEL_CSR: &str = "CERTIFICATE REQUEST";

/// The PEM label some older tools use for certificate signing requests.
pub const PEM_LABEL_CSR_LEGACY: &str = "NEW CERTIFICATE REQUEST";

/// The PEM label a signed certificate must carry.
pub const PEM_LABEL_CERTIFICATE: &str = "CERTIFICATE";


//------------ Serial Numbers -----------------------------------------------

/// The largest counter value that fits in the 14 hex digits of a serial.
pub const SERIAL_COUNTER_MAX: u64 = (1 << 56) - 1;


//------------ Remote Signer ------------------------------------------------

/// Path of the authenticated signing endpoint, relative to the signer URI.
pub const SIGNER_AUTHSIGN_PATH: &str = "api/v1/cfssl/authsign";

/// Default timeout for calls to the remote signer.
pub const SIGNER_DEFAULT_TIMEOUT_SECS: u64 = 30;


//------------ Logging ------------------------------------------------------

/// The log target used for audit events.
pub const AUDIT_LOG_TARGET: &str = "audit";


//------------ Storage ------------------------------------------------------

/// The directory under the storage root holding the serial counters.
pub const SERIAL_COUNTER_DIR: &str = "serial";

/// The directory under the storage root holding issued certificates.
pub const CERTIFICATE_DIR: &str = "certificates";
