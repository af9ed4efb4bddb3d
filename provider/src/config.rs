//! Provider configuration.

use std::sync::Arc;

use camino::Utf8PathBuf;
use metadata::MetadataDb;
use remote::{All, Only, Ordered, Platform, PlatformMatcher, StaticHosts};
use serde::Deserialize;

use crate::{LocalProvider, Provider, ProviderError};

/// Errors building a provider from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A platform specifier could not be parsed.
    #[error("invalid platform {0:?}, expected os/arch[/variant] or \"all\"")]
    InvalidPlatform(String),

    /// The provider itself could not be opened.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn default_work_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("imagecache")
}

/// Configuration for a [`LocalProvider`].
///
/// ```toml
/// work-dir = "/var/lib/imagecache"
/// plain-http = false
/// platform = "linux/arm64, linux/amd64"
///
/// [hosts."registry.local:5000"]
/// insecure = true
///
/// [hosts."ghcr.io"]
/// password-env = "GHCR_TOKEN"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProviderConfig {
    /// Root of the content store and metadata database.
    #[serde(default = "default_work_dir")]
    pub work_dir: Utf8PathBuf,

    /// Talk to every registry over plain HTTP.
    #[serde(default)]
    pub plain_http: bool,

    /// Platforms to pull: `all`, or a comma separated list in order of
    /// preference. Defaults to the running platform.
    #[serde(default)]
    pub platform: Option<String>,

    /// Per-registry settings, keyed by host.
    #[serde(default)]
    pub hosts: StaticHosts,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            plain_http: false,
            platform: None,
            hosts: StaticHosts::default(),
        }
    }
}

impl ProviderConfig {
    /// Open the provider this configuration describes.
    #[tracing::instrument(skip(self), fields(work_dir = %self.work_dir))]
    pub fn build(self) -> Result<(LocalProvider, MetadataDb), ConfigError> {
        let platform: Arc<dyn PlatformMatcher> = match &self.platform {
            Some(policy) => parse_platforms(policy)?,
            None => Arc::new(Only::host()),
        };

        let (provider, db) = LocalProvider::new(&self.work_dir, Arc::new(self.hosts), platform)?;
        if self.plain_http {
            provider.use_plain_http();
        }
        Ok((provider, db))
    }
}

/// Parse a platform policy: `all`, a single `os/arch[/variant]`, or a comma
/// separated list of them, most preferred first.
pub fn parse_platforms(policy: &str) -> Result<Arc<dyn PlatformMatcher>, ConfigError> {
    if policy.trim().eq_ignore_ascii_case("all") {
        return Ok(Arc::new(All));
    }

    let mut platforms = policy
        .split(',')
        .map(|part| {
            Platform::parse(part)
                .ok_or_else(|| ConfigError::InvalidPlatform(part.trim().to_owned()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let matcher: Arc<dyn PlatformMatcher> = if platforms.len() == 1 {
        Arc::new(Only(platforms.remove(0)))
    } else {
        Arc::new(Ordered(platforms))
    };
    Ok(matcher)
}
