//! # Registry access
//!
//! Everything needed to move images between a registry and a local
//! [`content::ContentStore`]:
//!
//! - [`HostResolver`] maps a reference to the credentials and TLS settings of
//!   its registry host.
//! - [`Resolver`] talks to one host, over HTTPS or plain HTTP.
//! - [`PlatformMatcher`] picks entries out of multi-platform images.
//! - [`Transferrer`] walks an image graph, with [`RegistryTransferrer`] as the
//!   implementation backed by the OCI distribution protocol.

mod credentials;
mod error;
mod hosts;
pub mod manifest;
mod platform;
mod resolver;
mod transfer;

#[doc(inline)]
pub use credentials::{CredentialProvider, Credentials, Secret};
#[doc(inline)]
pub use error::RemoteError;
#[doc(inline)]
pub use hosts::{HostConfig, HostEntry, HostResolver, StaticHosts};
#[doc(inline)]
pub use platform::{All, Only, Ordered, Platform, PlatformMatcher};
#[doc(inline)]
pub use resolver::Resolver;
#[doc(inline)]
pub use transfer::{select_manifests, FetchedImage, RegistryTransferrer, RemoteContext, Transferrer};
