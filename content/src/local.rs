use std::{fs::Metadata, sync::Arc, time::SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::{
    ContentError, ContentErrorKind, ContentStore, Descriptor, Digest, Info, LabelStore, Labels,
    MemoryLabelStore, Reader, Writer,
};

const BLOBS_DIR: &str = "blobs";
const INGEST_DIR: &str = "ingest";

/// Content store which keeps blobs as files under a root directory.
///
/// Committed blobs live at `blobs/<algorithm>/<encoded>`. Writes are streamed
/// into a temporary file under `ingest/`, verified, and then renamed into
/// place, so an interrupted write never leaves a readable partial blob.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: Utf8PathBuf,
    labels: Arc<dyn LabelStore>,
}

impl LocalStore {
    /// Open a store at `root` with in-memory labels, creating its directories.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, ContentError> {
        Self::with_labels(root, MemoryLabelStore::new())
    }

    /// Open a store at `root` which keeps labels in `labels`.
    pub fn with_labels<L>(root: impl Into<Utf8PathBuf>, labels: L) -> Result<Self, ContentError>
    where
        L: LabelStore + 'static,
    {
        let root = root.into();
        for dir in [root.join(BLOBS_DIR), root.join(INGEST_DIR)] {
            std::fs::create_dir_all(&dir)
                .map_err(|err| ContentError::io("local", err).context(format!("create {dir}")))?;
        }

        tracing::debug!(%root, "opened local content store");
        Ok(Self {
            root,
            labels: Arc::new(labels),
        })
    }

    /// The root directory of the store.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest) -> Utf8PathBuf {
        let mut path = self.root.join(BLOBS_DIR);
        path.push(digest.algorithm());
        path.push(digest.encoded());
        path
    }

    fn info_from_metadata(
        &self,
        digest: &Digest,
        metadata: &Metadata,
    ) -> Result<Info, ContentError> {
        let updated = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        let created = metadata.created().unwrap_or(updated);

        Ok(Info {
            digest: digest.clone(),
            size: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
            updated_at: DateTime::<Utc>::from(updated),
            labels: self.labels.get(digest)?,
        })
    }
}

#[async_trait::async_trait]
impl ContentStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn info(&self, digest: &Digest) -> Result<Info, ContentError> {
        let path = self.blob_path(digest);
        let metadata = tokio::fs::metadata(&path).await.map_err(|err| {
            ContentError::io(self.name(), err)
                .digest(digest)
                .context("stat blob")
        })?;
        self.info_from_metadata(digest, &metadata)
    }

    async fn update_labels(&self, digest: &Digest, labels: Labels) -> Result<Info, ContentError> {
        // labels may only be attached to committed content
        self.info(digest).await?;
        self.labels.update(digest, labels)?;
        self.info(digest).await
    }

    async fn list(&self) -> Result<Vec<Info>, ContentError> {
        let mut infos = Vec::new();
        let mut algorithms = tokio::fs::read_dir(self.root.join(BLOBS_DIR))
            .await
            .map_err(|err| ContentError::io(self.name(), err).context("read blobs dir"))?;

        while let Some(algorithm) = algorithms
            .next_entry()
            .await
            .map_err(|err| ContentError::io(self.name(), err).context("read blobs dir"))?
        {
            let Ok(algorithm_name) = algorithm.file_name().into_string() else {
                continue;
            };

            let mut entries = tokio::fs::read_dir(algorithm.path())
                .await
                .map_err(|err| ContentError::io(self.name(), err).context("read digest dir"))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| ContentError::io(self.name(), err).context("read digest dir"))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                let Ok(digest) = format!("{algorithm_name}:{name}").parse::<Digest>() else {
                    tracing::warn!(%algorithm_name, %name, "skipping unrecognised file in blob store");
                    continue;
                };

                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|err| ContentError::io(self.name(), err).digest(&digest))?;
                infos.push(self.info_from_metadata(&digest, &metadata)?);
            }
        }

        tracing::debug!("Found {} blobs", infos.len());
        Ok(infos)
    }

    async fn delete(&self, digest: &Digest) -> Result<(), ContentError> {
        tokio::fs::remove_file(self.blob_path(digest))
            .await
            .map_err(|err| {
                ContentError::io(self.name(), err)
                    .digest(digest)
                    .context("remove blob")
            })?;
        self.labels.remove(digest)?;
        Ok(())
    }

    async fn read(&self, digest: &Digest, writer: &mut Writer<'_>) -> Result<u64, ContentError> {
        let path = self.blob_path(digest);
        let mut reader = tokio::io::BufReader::new(tokio::fs::File::open(&path).await.map_err(
            |err| {
                ContentError::io(self.name(), err)
                    .digest(digest)
                    .context("open blob")
            },
        )?);

        let copied = tokio::io::copy(&mut reader, writer).await.map_err(|err| {
            ContentError::io(self.name(), err)
                .digest(digest)
                .context("copy blob")
        })?;

        writer
            .flush()
            .await
            .map_err(|err| ContentError::io(self.name(), err).context("flush writer"))?;

        Ok(copied)
    }

    #[tracing::instrument(skip(self, reader), fields(digest = %expected.digest, size = expected.size))]
    async fn write(
        &self,
        expected: &Descriptor,
        reader: &mut Reader<'_>,
    ) -> Result<Info, ContentError> {
        let digest = &expected.digest;
        match self.info(digest).await {
            Ok(info) => {
                tracing::trace!("blob already committed");
                return Ok(info);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        // The temporary file is removed on drop, which covers both failed
        // verification and a cancelled write future.
        let (file, ingest) = tempfile::Builder::new()
            .prefix("ingest-")
            .tempfile_in(self.root.join(INGEST_DIR))
            .map_err(|err| ContentError::io(self.name(), err).context("create ingest file"))?
            .into_parts();

        let mut file = tokio::io::BufWriter::new(tokio::fs::File::from_std(file));
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        loop {
            let chunk = reader
                .fill_buf()
                .await
                .map_err(|err| ContentError::io(self.name(), err).context("read source"))?;
            if chunk.is_empty() {
                break;
            }

            let n = chunk.len();
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|err| ContentError::io(self.name(), err).context("write ingest file"))?;
            reader.consume(n);
            size += n as u64;
        }

        file.flush()
            .await
            .map_err(|err| ContentError::io(self.name(), err).context("flush ingest file"))?;
        file.into_inner()
            .sync_all()
            .await
            .map_err(|err| ContentError::io(self.name(), err).context("sync ingest file"))?;

        if size != expected.size {
            return Err(ContentError::builder(
                self.name(),
                ContentErrorKind::SizeMismatch,
                format!("expected {} bytes, got {size}", expected.size),
            )
            .digest(digest)
            .build());
        }

        let actual = Digest::from_sha256(hasher.finalize().as_slice());
        if &actual != digest {
            return Err(ContentError::builder(
                self.name(),
                ContentErrorKind::DigestMismatch,
                format!("content hashed to {actual}"),
            )
            .digest(digest)
            .build());
        }

        let target = self.blob_path(digest);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ContentError::io(self.name(), err).context("create blob dir"))?;
        }
        ingest.persist(&target).map_err(|err| {
            ContentError::io(self.name(), err.error)
                .digest(digest)
                .context("commit blob")
        })?;

        tracing::trace!(%target, "committed blob");
        self.info(digest).await
    }
}
