use std::{collections::BTreeMap, fmt, ops::Deref, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::io;

use crate::{ContentError, Descriptor, Digest};

/// A reader stream for blob contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for blob contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// Labels attached to a blob, e.g. garbage collection roots.
pub type Labels = BTreeMap<String, String>;

/// Information about a committed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    /// Digest of the blob.
    pub digest: Digest,

    /// Size of the blob in bytes.
    pub size: u64,

    /// When the blob was committed.
    pub created_at: DateTime<Utc>,

    /// When the blob or its labels were last changed.
    pub updated_at: DateTime<Utc>,

    /// Labels attached to the blob.
    pub labels: Labels,
}

/// A content-addressable blob store.
///
/// Blobs are keyed by the digest of their contents and are write-once:
/// writing a digest which is already committed succeeds without touching the
/// stored bytes. A blob only becomes visible once its bytes have been verified
/// against the expected descriptor.
#[async_trait::async_trait]
pub trait ContentStore: fmt::Debug + Send + Sync {
    /// The name of the store engine, used in errors and traces.
    fn name(&self) -> &'static str;

    /// Get information about a committed blob.
    async fn info(&self, digest: &Digest) -> Result<Info, ContentError>;

    /// Merge `labels` into the labels of a committed blob.
    ///
    /// A label with an empty value is removed.
    async fn update_labels(&self, digest: &Digest, labels: Labels) -> Result<Info, ContentError>;

    /// List every committed blob.
    async fn list(&self) -> Result<Vec<Info>, ContentError>;

    /// Delete a committed blob.
    async fn delete(&self, digest: &Digest) -> Result<(), ContentError>;

    /// Copy a committed blob into `writer`, returning the number of bytes copied.
    async fn read(&self, digest: &Digest, writer: &mut Writer<'_>) -> Result<u64, ContentError>;

    /// Commit the contents of `reader` as the blob described by `expected`.
    ///
    /// The bytes are verified against the expected size and digest before the
    /// blob becomes visible. If the digest is already committed the reader is
    /// not consumed and the existing blob's info is returned.
    async fn write(
        &self,
        expected: &Descriptor,
        reader: &mut Reader<'_>,
    ) -> Result<Info, ContentError>;

    /// Check whether a blob is committed.
    async fn contains(&self, digest: &Digest) -> Result<bool, ContentError> {
        match self.info(digest).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read a whole blob into memory.
    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, ContentError> {
        let mut data = Vec::new();
        self.read(digest, &mut data).await?;
        Ok(data)
    }

    /// Commit an in-memory blob.
    async fn write_blob(&self, expected: &Descriptor, data: &[u8]) -> Result<Info, ContentError> {
        let mut reader = data;
        self.write(expected, &mut reader).await
    }
}

#[async_trait::async_trait]
impl<S> ContentStore for Arc<S>
where
    S: ?Sized + ContentStore,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn info(&self, digest: &Digest) -> Result<Info, ContentError> {
        self.deref().info(digest).await
    }

    async fn update_labels(&self, digest: &Digest, labels: Labels) -> Result<Info, ContentError> {
        self.deref().update_labels(digest, labels).await
    }

    async fn list(&self) -> Result<Vec<Info>, ContentError> {
        self.deref().list().await
    }

    async fn delete(&self, digest: &Digest) -> Result<(), ContentError> {
        self.deref().delete(digest).await
    }

    async fn read(&self, digest: &Digest, writer: &mut Writer<'_>) -> Result<u64, ContentError> {
        self.deref().read(digest, writer).await
    }

    async fn write(
        &self,
        expected: &Descriptor,
        reader: &mut Reader<'_>,
    ) -> Result<Info, ContentError> {
        self.deref().write(expected, reader).await
    }
}
