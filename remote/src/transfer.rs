//! Moving image graphs between a registry and a content store.

use std::{fmt, sync::Arc};

use content::{ContentStore, Descriptor};
use futures::future::BoxFuture;
use oci_distribution::Reference;
use tokio::io::{AsyncWriteExt, BufReader};

use crate::{
    hosts::parse_reference,
    manifest::{Manifest, ManifestKind},
    platform::{self, PlatformMatcher},
    resolver::{pinned, Resolver},
    RemoteError,
};

const STREAM_BUFFER: usize = 64 * 1024;

/// Everything a transfer needs to know about the remote side.
#[derive(Clone)]
pub struct RemoteContext {
    /// Resolver for the registry host.
    pub resolver: Resolver,

    /// Which entries of an image index to transfer.
    pub platform: Arc<dyn PlatformMatcher>,
}

impl fmt::Debug for RemoteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteContext")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    /// Fully qualified name of the fetched reference.
    pub name: String,

    /// Descriptor of the top-level manifest.
    pub target: Descriptor,
}

/// Walks image graphs between a registry and a content store.
#[async_trait::async_trait]
pub trait Transferrer: Send + Sync {
    /// Fetch `reference` and everything it points at into `store`.
    ///
    /// From an image index, at most `limit` platform manifests matching the
    /// context's policy are fetched, most preferred first. A `limit` of zero
    /// fetches every match.
    async fn fetch(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        reference: &str,
        limit: usize,
    ) -> Result<FetchedImage, RemoteError>;

    /// Push the graph rooted at `desc` from `store` to `reference`.
    async fn push(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        desc: &Descriptor,
        reference: &str,
    ) -> Result<(), RemoteError>;
}

#[async_trait::async_trait]
impl<T> Transferrer for Arc<T>
where
    T: Transferrer + ?Sized,
{
    async fn fetch(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        reference: &str,
        limit: usize,
    ) -> Result<FetchedImage, RemoteError> {
        (**self).fetch(store, rctx, reference, limit).await
    }

    async fn push(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        desc: &Descriptor,
        reference: &str,
    ) -> Result<(), RemoteError> {
        (**self).push(store, rctx, desc, reference).await
    }
}

/// Index entries to follow: those accepted by `matcher`, most preferred
/// first, truncated to `limit` unless it is zero.
///
/// Entries without a platform are always followed, after the platform
/// specific ones.
pub fn select_manifests(
    manifests: &[Descriptor],
    matcher: &dyn PlatformMatcher,
    limit: usize,
) -> Vec<Descriptor> {
    let (mut selected, unplatformed): (Vec<Descriptor>, Vec<Descriptor>) = manifests
        .iter()
        .filter(|desc| desc.platform.as_ref().map_or(true, |p| matcher.matches(p)))
        .cloned()
        .partition(|desc| desc.platform.is_some());

    selected.sort_by(|a, b| match (&a.platform, &b.platform) {
        (Some(a), Some(b)) => platform::ordering(matcher, a, b),
        _ => std::cmp::Ordering::Equal,
    });
    selected.extend(unplatformed);

    if limit > 0 {
        selected.truncate(limit);
    }
    selected
}

/// A [`Transferrer`] speaking the OCI distribution protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryTransferrer;

impl RegistryTransferrer {
    /// Create a registry transferrer.
    pub fn new() -> Self {
        Self
    }

    /// Store the manifest `desc` and everything below it, children first so a
    /// committed manifest implies its graph is present.
    fn fetch_tree<'a>(
        &'a self,
        store: &'a dyn ContentStore,
        rctx: &'a RemoteContext,
        reference: &'a Reference,
        desc: Descriptor,
        data: Option<Vec<u8>>,
        limit: usize,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let data = match data {
                Some(data) => data,
                None => {
                    if store.contains(&desc.digest).await? {
                        store.read_blob(&desc.digest).await?
                    } else {
                        rctx.resolver.fetch_manifest(reference, &desc).await?
                    }
                }
            };

            let manifest = Manifest::parse(&desc, &data)?;
            match &manifest {
                Manifest::Index(index) => {
                    let children =
                        select_manifests(&index.manifests, rctx.platform.as_ref(), limit);
                    tracing::debug!(
                        total = index.manifests.len(),
                        selected = children.len(),
                        "walking index"
                    );
                    for child in children {
                        self.fetch_tree(store, rctx, reference, child, None, limit)
                            .await?;
                    }
                }
                Manifest::Image(_) => {
                    for blob in manifest.children() {
                        self.fetch_blob(store, rctx, reference, blob).await?;
                    }
                }
            }

            store.write_blob(&desc, &data).await?;
            store.update_labels(&desc.digest, manifest.gc_labels()).await?;
            tracing::trace!(digest = %desc.digest, "stored manifest");
            Ok(())
        })
    }

    async fn fetch_blob(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        reference: &Reference,
        desc: &Descriptor,
    ) -> Result<(), RemoteError> {
        if store.contains(&desc.digest).await? {
            tracing::trace!(digest = %desc.digest, "blob already present");
            return Ok(());
        }

        let (mut tx, rx) = tokio::io::duplex(STREAM_BUFFER);
        let download = async move {
            rctx.resolver.fetch_blob(reference, desc, &mut tx).await?;
            tx.shutdown()
                .await
                .map_err(|err| RemoteError::registry(format!("fetch blob {}", desc.digest), err))
        };
        let commit = async move {
            let mut reader = BufReader::new(rx);
            store.write(desc, &mut reader).await
        };

        // Each side owns its half of the pipe, so either finishing early ends
        // the other instead of leaving it blocked.
        match tokio::join!(download, commit) {
            (_, Ok(info)) => {
                tracing::debug!(digest = %info.digest, size = info.size, "fetched blob");
                Ok(())
            }
            // A download cut short leaves the store with a truncated stream.
            (Err(err), Err(commit)) if commit.kind().is_verification_failure() => Err(err),
            // Otherwise the store failed first and the download only saw the
            // pipe close.
            (_, Err(commit)) => Err(commit.into()),
        }
    }

    fn push_tree<'a>(
        &'a self,
        store: &'a dyn ContentStore,
        rctx: &'a RemoteContext,
        reference: &'a Reference,
        target: &'a Reference,
        desc: &'a Descriptor,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let data = store.read_blob(&desc.digest).await?;
            if ManifestKind::of(&desc.media_type).is_none() {
                return rctx.resolver.push_blob(reference, desc, &data).await;
            }

            let manifest = Manifest::parse(desc, &data)?;
            match &manifest {
                Manifest::Index(index) => {
                    for child in select_manifests(&index.manifests, rctx.platform.as_ref(), 0) {
                        if !store.contains(&child.digest).await? {
                            tracing::debug!(digest = %child.digest, "skipping manifest missing locally");
                            continue;
                        }
                        let by_digest = pinned(reference, &child.digest);
                        self.push_tree(store, rctx, reference, &by_digest, &child)
                            .await?;
                    }
                }
                Manifest::Image(_) => {
                    for blob in manifest.children() {
                        let data = store.read_blob(&blob.digest).await?;
                        rctx.resolver.push_blob(reference, blob, &data).await?;
                        tracing::trace!(digest = %blob.digest, "pushed blob");
                    }
                }
            }

            rctx.resolver.push_manifest(target, desc, data).await?;
            tracing::debug!(digest = %desc.digest, "pushed manifest");
            Ok(())
        })
    }
}

#[async_trait::async_trait]
impl Transferrer for RegistryTransferrer {
    #[tracing::instrument(skip(self, store, rctx), fields(scheme = rctx.resolver.scheme()))]
    async fn fetch(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        reference: &str,
        limit: usize,
    ) -> Result<FetchedImage, RemoteError> {
        let parsed = parse_reference(reference)?;
        let (target, data) = rctx.resolver.fetch_root(&parsed).await?;
        ManifestKind::require(&target.media_type)?;

        self.fetch_tree(store, rctx, &parsed, target.clone(), Some(data), limit)
            .await?;

        Ok(FetchedImage {
            name: parsed.whole(),
            target,
        })
    }

    #[tracing::instrument(skip(self, store, rctx), fields(digest = %desc.digest))]
    async fn push(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        desc: &Descriptor,
        reference: &str,
    ) -> Result<(), RemoteError> {
        let parsed = parse_reference(reference)?;
        rctx.resolver.authorize_push(&parsed).await?;
        self.push_tree(store, rctx, &parsed, &parsed, desc).await
    }
}
