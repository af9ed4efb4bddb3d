//! # Image provider
//!
//! A local, content addressed cache of OCI images. [`LocalProvider`] pulls
//! images from registries into a durable store, remembers which descriptor
//! each reference resolved to, and pushes cached images back out.
//!
//! ```no_run
//! # async fn run() -> Result<(), provider::ProviderError> {
//! use std::sync::Arc;
//! use provider::{LocalProvider, Provider};
//! use remote::{Only, StaticHosts};
//!
//! let (provider, _db) = LocalProvider::new(
//!     "/var/lib/imagecache",
//!     Arc::new(StaticHosts::new()),
//!     Arc::new(Only::host()),
//! )?;
//!
//! provider.pull("docker.io/library/alpine:3.20").await?;
//! let image = provider.image("docker.io/library/alpine:3.20")?;
//! println!("{}", image.digest);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use content::{ContentStore, Descriptor};
use remote::Resolver;

mod config;
mod error;
mod local;

#[doc(inline)]
pub use config::{parse_platforms, ConfigError, ProviderConfig};
#[doc(inline)]
pub use error::ProviderError;
#[doc(inline)]
pub use local::{LocalProvider, CONTENT_DIR, METADATA_DB};

/// Access to a cache of images backed by remote registries.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Talk to registries over plain HTTP.
    ///
    /// Only resolvers built after this call are affected.
    fn use_plain_http(&self);

    /// Build a resolver for the registry host of `reference`.
    fn resolver(&self, reference: &str) -> Result<Resolver, ProviderError>;

    /// Fetch `reference` into the content store and remember its descriptor.
    async fn pull(&self, reference: &str) -> Result<(), ProviderError>;

    /// Push the image rooted at `desc` from the content store to `reference`.
    async fn push(&self, desc: &Descriptor, reference: &str) -> Result<(), ProviderError>;

    /// The descriptor `reference` resolved to when it was last pulled.
    fn image(&self, reference: &str) -> Result<Descriptor, ProviderError>;

    /// The content store images are pulled into.
    fn content_store(&self) -> Arc<dyn ContentStore>;
}
