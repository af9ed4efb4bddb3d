use std::sync::Arc;

use chrono::Utc;
use content::{ContentError, ContentStore, Descriptor, Digest, Info, Labels, Reader, Writer};

use crate::{db, MetadataDb};

/// A content store whose contents are tracked in the metadata index.
///
/// Blobs only become visible through this store once they are both committed
/// to the inner store and recorded in the index. Labels set through this
/// store are persisted in the database rather than the inner store.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    db: MetadataDb,
    inner: Arc<dyn ContentStore>,
}

impl MetadataStore {
    pub(crate) fn new(db: MetadataDb, inner: Arc<dyn ContentStore>) -> Self {
        Self { db, inner }
    }

    /// The database backing this index.
    pub fn db(&self) -> &MetadataDb {
        &self.db
    }

    async fn indexed(&self, digest: &Digest) -> Result<Option<Info>, ContentError> {
        let key = digest.clone();
        Ok(self.db.run(move |conn| db::get(conn, &key)).await?)
    }
}

#[async_trait::async_trait]
impl ContentStore for MetadataStore {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn info(&self, digest: &Digest) -> Result<Info, ContentError> {
        self.indexed(digest)
            .await?
            .ok_or_else(|| ContentError::not_found(self.name(), digest))
    }

    async fn update_labels(&self, digest: &Digest, labels: Labels) -> Result<Info, ContentError> {
        let key = digest.clone();
        self.db
            .run(move |conn| db::update_labels(conn, &key, labels, Utc::now()))
            .await?
            .ok_or_else(|| ContentError::not_found(self.name(), digest))
    }

    async fn list(&self) -> Result<Vec<Info>, ContentError> {
        Ok(self.db.run(|conn| db::list(conn)).await?)
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn delete(&self, digest: &Digest) -> Result<(), ContentError> {
        let key = digest.clone();
        if !self.db.run(move |conn| db::remove(conn, &key)).await? {
            return Err(ContentError::not_found(self.name(), digest));
        }

        match self.inner.delete(digest).await {
            Err(err) if err.is_not_found() => {
                tracing::debug!("indexed blob was already missing from the inner store");
                Ok(())
            }
            other => other,
        }
    }

    async fn read(&self, digest: &Digest, writer: &mut Writer<'_>) -> Result<u64, ContentError> {
        self.info(digest).await?;
        self.inner.read(digest, writer).await
    }

    #[tracing::instrument(skip(self, reader), fields(digest = %expected.digest))]
    async fn write(
        &self,
        expected: &Descriptor,
        reader: &mut Reader<'_>,
    ) -> Result<Info, ContentError> {
        if let Some(info) = self.indexed(&expected.digest).await? {
            if self.inner.contains(&expected.digest).await? {
                tracing::trace!("blob already indexed");
                return Ok(info);
            }
        }

        let committed = self.inner.write(expected, reader).await?;
        let Info { digest, size, .. } = committed;
        let info = self
            .db
            .run(move |conn| db::insert(conn, &digest, size, Utc::now()))
            .await?;

        tracing::trace!(size = info.size, "indexed blob");
        Ok(info)
    }
}
