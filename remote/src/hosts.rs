//! Per-reference host configuration.

use std::{collections::BTreeMap, fmt, sync::Arc};

use oci_distribution::Reference;
use serde::Deserialize;

use crate::{
    credentials::{CredentialProvider, Credentials, Secret},
    RemoteError,
};

/// How to talk to the registry hosting a reference.
#[derive(Clone)]
pub struct HostConfig {
    /// Source of credentials for the registry host.
    pub credentials: Arc<dyn CredentialProvider>,

    /// Accept invalid TLS certificates.
    pub insecure: bool,
}

impl HostConfig {
    /// Anonymous access over verified TLS.
    pub fn anonymous() -> Self {
        Self {
            credentials: Arc::new(Credentials::Anonymous),
            insecure: false,
        }
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

/// Maps an image reference to the configuration of its registry host.
pub trait HostResolver: Send + Sync {
    /// Host configuration for `reference`.
    fn resolve(&self, reference: &str) -> Result<HostConfig, RemoteError>;
}

impl<F> HostResolver for F
where
    F: Fn(&str) -> Result<HostConfig, RemoteError> + Send + Sync,
{
    fn resolve(&self, reference: &str) -> Result<HostConfig, RemoteError> {
        (self)(reference)
    }
}

/// Parse `reference` the way registry requests will see it.
pub(crate) fn parse_reference(reference: &str) -> Result<Reference, RemoteError> {
    reference
        .parse()
        .map_err(|err: oci_distribution::ParseError| RemoteError::InvalidReference {
            reference: reference.to_owned(),
            reason: err.to_string(),
        })
}

/// Configuration for a single registry host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HostEntry {
    /// Accept invalid TLS certificates from this host.
    #[serde(default)]
    pub insecure: bool,

    /// Account name for basic authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the password, or the identity token when
    /// no username is set.
    #[serde(default)]
    pub password_env: Option<String>,
}

impl CredentialProvider for HostEntry {
    fn credentials(&self, host: &str) -> Result<Credentials, RemoteError> {
        let secret = match &self.password_env {
            Some(var) => Some(Secret::from_env(var).map_err(|err| RemoteError::Credentials {
                host: host.to_owned(),
                reason: format!("{var}: {err}"),
            })?),
            None => None,
        };

        Ok(match (&self.username, secret) {
            (Some(username), Some(password)) => Credentials::Basic {
                username: username.clone(),
                password,
            },
            (None, Some(token)) => Credentials::Bearer(token),
            (Some(_), None) => {
                return Err(RemoteError::Credentials {
                    host: host.to_owned(),
                    reason: "username configured without password-env".into(),
                })
            }
            (None, None) => Credentials::Anonymous,
        })
    }
}

/// A [`HostResolver`] driven by a fixed table of registry hosts.
///
/// Hosts without an entry are accessed anonymously over verified TLS.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticHosts {
    hosts: BTreeMap<String, HostEntry>,
}

impl StaticHosts {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `host`.
    pub fn insert(&mut self, host: impl Into<String>, entry: HostEntry) -> &mut Self {
        self.hosts.insert(host.into(), entry);
        self
    }

    /// The entry configured for `host`, if any.
    pub fn get(&self, host: &str) -> Option<&HostEntry> {
        self.hosts.get(host)
    }
}

impl HostResolver for StaticHosts {
    fn resolve(&self, reference: &str) -> Result<HostConfig, RemoteError> {
        let parsed = parse_reference(reference)?;
        let entry = self
            .hosts
            .get(parsed.registry())
            .or_else(|| self.hosts.get(parsed.resolve_registry()));

        match entry {
            Some(entry) => {
                tracing::trace!(host = parsed.registry(), "using configured host");
                Ok(HostConfig {
                    credentials: Arc::new(entry.clone()),
                    insecure: entry.insecure,
                })
            }
            None => Ok(HostConfig::anonymous()),
        }
    }
}
