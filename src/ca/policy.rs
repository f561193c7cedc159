//! Deciding whether the CA is willing to issue for a name.

use std::fmt;
use std::net::IpAddr;

use log::trace;

use crate::commons::api::{Identifier, IdentifierType};


//------------ PolicyAuthority -----------------------------------------------

pub trait PolicyAuthority: Send + Sync {
    /// Returns `Ok(())` if a certificate may be issued for the identifier.
    fn willing_to_issue(&self, identifier: &Identifier) -> Result<(), PolicyError>;
}


//------------ PolicyError ---------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyError(String);

impl PolicyError {
    pub fn new(reason: impl fmt::Display) -> Self {
        PolicyError(reason.to_string())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PolicyError {}


//------------ HostnamePolicy ------------------------------------------------

/// Accepts syntactically valid DNS names that are not blocked.
///
/// A blocked entry matches the name itself and every name below it.
/// Comparison ignores case and a trailing dot.
#[derive(Clone, Debug, Default)]
pub struct HostnamePolicy {
    blocked: Vec<String>,
}

impl HostnamePolicy {
    pub fn new(blocked: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        HostnamePolicy {
            blocked: blocked.into_iter().map(|name| normalize(name.as_ref())).collect(),
        }
    }

    fn check_syntax(name: &str) -> Result<(), PolicyError> {
        if name.is_empty() {
            return Err(PolicyError::new("name is empty"));
        }
        if name.len() > 253 {
            return Err(PolicyError::new("name is longer than 253 characters"));
        }

        for label in name.split('.') {
            if label.is_empty() {
                return Err(PolicyError::new("name contains an empty label"));
            }
            if label.len() > 63 {
                return Err(PolicyError::new(format!(
                    "label '{label}' is longer than 63 characters"
                )));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(PolicyError::new(format!(
                    "label '{label}' starts or ends with a hyphen"
                )));
            }
            if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return Err(PolicyError::new(format!(
                    "label '{label}' contains invalid characters"
                )));
            }
        }

        if name.parse::<IpAddr>().is_ok() {
            return Err(PolicyError::new("name is an IP address"));
        }
        if !name.contains('.') {
            return Err(PolicyError::new("name is not fully qualified"));
        }
        Ok(())
    }
}

impl PolicyAuthority for HostnamePolicy {
    fn willing_to_issue(&self, identifier: &Identifier) -> Result<(), PolicyError> {
        match identifier.id_type() {
            IdentifierType::Dns => {}
        }

        let name = normalize(identifier.value());
        Self::check_syntax(&name)?;

        for blocked in &self.blocked {
            if name == *blocked || name.ends_with(&format!(".{blocked}")) {
                return Err(PolicyError::new(format!(
                    "name is blocked by entry '{blocked}'"
                )));
            }
        }

        trace!("policy allows {identifier}");
        Ok(())
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn check(policy: &HostnamePolicy, name: &str) -> Result<(), PolicyError> {
        policy.willing_to_issue(&Identifier::dns(name))
    }

    #[test]
    fn allow_valid_names() {
        let policy = HostnamePolicy::default();
        check(&policy, "example.com").unwrap();
        check(&policy, "www.Example.COM.").unwrap();
        check(&policy, "xn--bcher-kva.example").unwrap();
        check(&policy, "a-b.c-d.example").unwrap();
    }

    #[test]
    fn reject_bad_syntax() {
        let policy = HostnamePolicy::default();
        let long_label = format!("{}.com", "a".repeat(64));
        for name in [
            "",
            "localhost",
            "exa mple.com",
            "-example.com",
            "example-.com",
            "example..com",
            "*.example.com",
            "under_score.example.com",
            "192.0.2.1",
            long_label.as_str(),
        ] {
            assert!(check(&policy, name).is_err(), "accepted '{name}'");
        }
    }

    #[test]
    fn reject_blocked_names_and_subdomains() {
        let policy = HostnamePolicy::new(["Evil.com", "bad.example."]);

        assert!(check(&policy, "evil.com").is_err());
        assert!(check(&policy, "www.evil.com").is_err());
        assert!(check(&policy, "sub.bad.example").is_err());

        check(&policy, "notevil.com").unwrap();
        check(&policy, "good.example").unwrap();
    }
}
