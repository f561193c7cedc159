extern crate issuer;

use std::path::{Path, PathBuf};
use std::{fmt, fs, process};

use clap::Parser;

use issuer::ca::CertificateAuthority;
use issuer::commons::crypto::CertificateRequest;
use issuer::config::Config;
use issuer::constants::{ISSUER_APP, ISSUER_DEFAULT_CONFIG_FILE};

/// Issues a certificate for a certificate signing request.
#[derive(clap::Parser)]
#[command(version, about)]
struct Options {
    /// Path to the config file
    #[arg(
        short,
        long,
        env = "ISSUER_CONFIG",
        value_name = "path",
        default_value = ISSUER_DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// The CSR, PEM or DER encoded
    #[arg(value_name = "csr-file")]
    csr: PathBuf,
}

fn main() {
    let options = Options::parse();

    match issue(&options) {
        Ok(pem) => print!("{pem}"),
        Err(e) => {
            eprintln!("{ISSUER_APP} failed: {e}");
            process::exit(1);
        }
    }
}

fn issue(options: &Options) -> Result<String, String> {
    let config = Config::parse(&options.config).map_err(to_string)?;
    config.init_logging().map_err(to_string)?;

    let csr = read_csr(&options.csr)?;
    let ca = CertificateAuthority::from_config(&config).map_err(to_string)?;
    let cert = ca.issue_certificate(&csr).map_err(to_string)?;

    Ok(cert.to_pem())
}

fn read_csr(path: &Path) -> Result<CertificateRequest, String> {
    let data = fs::read(path).map_err(|e| {
        format!("Could not read CSR file '{}': {}", path.display(), e)
    })?;

    if data.trim_ascii_start().starts_with(b"-----BEGIN") {
        CertificateRequest::from_pem(&data)
    } else {
        CertificateRequest::decode(&data)
    }
    .map_err(|e| format!("Invalid CSR in '{}': {}", path.display(), e))
}

fn to_string(err: impl fmt::Display) -> String {
    err.to_string()
}
