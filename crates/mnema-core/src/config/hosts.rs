use serde::{Deserialize, Serialize};

use crate::error::MnemaError;

/// Closed host allow-list for memory operations.
///
/// Non-admin tool calls must arrive through one of the listed hosts,
/// otherwise they are rejected with a policy error naming the canonical
/// ingress. An empty list disables the check (single-ingress deployments).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostPolicy {
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_canonical_host")]
    pub canonical_host: String,
}

fn default_canonical_host() -> String {
    "mnema.dev".to_string()
}

impl HostPolicy {
    /// Check the inbound `Host` header value. Ports are ignored; subdomains
    /// of an allowed host are allowed.
    pub fn check(&self, host: Option<&str>) -> Result<(), MnemaError> {
        if self.allowed_hosts.is_empty() {
            return Ok(());
        }
        let forbidden = || MnemaError::ForbiddenHost {
            canonical: self.canonical_host.clone(),
        };
        let Some(host) = host else {
            return Err(forbidden());
        };
        let bare = host.split(':').next().unwrap_or(host);
        let allowed = self
            .allowed_hosts
            .iter()
            .any(|a| bare == a.as_str() || bare.ends_with(&format!(".{a}")));
        if allowed { Ok(()) } else { Err(forbidden()) }
    }
}
