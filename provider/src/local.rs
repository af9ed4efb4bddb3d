use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use camino::Utf8Path;
use content::{ContentStore, Descriptor, LocalStore, MemoryLabelStore};
use metadata::MetadataDb;
use parking_lot::Mutex;
use remote::{
    HostResolver, PlatformMatcher, RegistryTransferrer, RemoteContext, Resolver, Transferrer,
};

use crate::{Provider, ProviderError};

/// Directory under the work dir holding the blob store.
pub const CONTENT_DIR: &str = "content";

/// Name of the metadata database under the work dir.
pub const METADATA_DB: &str = "meta.db";

/// A [`Provider`] caching images in a local content store.
///
/// Blobs are kept under `<work_dir>/content` and indexed in
/// `<work_dir>/meta.db`. The descriptor each reference last pulled to is
/// remembered for the lifetime of the provider.
pub struct LocalProvider {
    hosts: Arc<dyn HostResolver>,
    platform: Arc<dyn PlatformMatcher>,
    store: Arc<dyn ContentStore>,
    transferrer: Arc<dyn Transferrer>,
    plain_http: AtomicBool,
    images: Mutex<HashMap<String, Descriptor>>,
}

impl fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProvider")
            .field("store", &self.store)
            .field("plain_http", &self.plain_http)
            .field("images", &self.images.lock().len())
            .finish_non_exhaustive()
    }
}

impl LocalProvider {
    /// Open the content store and metadata database under `work_dir`.
    ///
    /// The returned [`MetadataDb`] shares its connection with the provider's
    /// store; keep it to compact the database on shutdown.
    #[tracing::instrument(skip_all, fields(work_dir = %work_dir.as_ref()))]
    pub fn new(
        work_dir: impl AsRef<Utf8Path>,
        hosts: Arc<dyn HostResolver>,
        platform: Arc<dyn PlatformMatcher>,
    ) -> Result<(Self, MetadataDb), ProviderError> {
        let work_dir = work_dir.as_ref();
        let content_dir = work_dir.join(CONTENT_DIR);
        create_content_dir(&content_dir)
            .map_err(ProviderError::storage(format!("create {content_dir}")))?;

        let local = LocalStore::with_labels(content_dir.clone(), MemoryLabelStore::new())
            .map_err(ProviderError::storage("open content store"))?;

        let db = MetadataDb::open(work_dir.join(METADATA_DB))
            .map_err(ProviderError::storage("open metadata database"))?;

        let provider = Self {
            hosts,
            platform,
            store: Arc::new(db.content_store(local)),
            transferrer: Arc::new(RegistryTransferrer::new()),
            plain_http: AtomicBool::new(false),
            images: Mutex::new(HashMap::new()),
        };

        tracing::debug!("opened local provider");
        Ok((provider, db))
    }

    /// Replace the transfer implementation.
    pub fn with_transferrer<T>(mut self, transferrer: T) -> Self
    where
        T: Transferrer + 'static,
    {
        self.transferrer = Arc::new(transferrer);
        self
    }

    fn remote_context(&self, reference: &str) -> Result<RemoteContext, ProviderError> {
        Ok(RemoteContext {
            resolver: self.resolver(reference)?,
            platform: Arc::clone(&self.platform),
        })
    }

    fn set_image(&self, reference: &str, target: Descriptor) {
        self.images.lock().insert(reference.to_owned(), target);
    }
}

#[cfg(unix)]
fn create_content_dir(path: &Utf8Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}

#[cfg(not(unix))]
fn create_content_dir(path: &Utf8Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    fn use_plain_http(&self) {
        self.plain_http.store(true, Ordering::SeqCst);
    }

    fn resolver(&self, reference: &str) -> Result<Resolver, ProviderError> {
        let host = self
            .hosts
            .resolve(reference)
            .map_err(ProviderError::Resolution)?;

        Ok(Resolver::new(
            host.insecure,
            self.plain_http.load(Ordering::SeqCst),
            host.credentials,
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn pull(&self, reference: &str) -> Result<(), ProviderError> {
        let rctx = self.remote_context(reference)?;
        let fetched = self
            .transferrer
            .fetch(self.store.as_ref(), &rctx, reference, 0)
            .await
            .map_err(ProviderError::Pull)?;

        tracing::debug!(
            name = %fetched.name,
            digest = %fetched.target.digest,
            "pulled image"
        );
        self.set_image(reference, fetched.target);
        Ok(())
    }

    #[tracing::instrument(skip(self, desc), fields(digest = %desc.digest))]
    async fn push(&self, desc: &Descriptor, reference: &str) -> Result<(), ProviderError> {
        let rctx = self.remote_context(reference)?;
        self.transferrer
            .push(self.store.as_ref(), &rctx, desc, reference)
            .await
            .map_err(ProviderError::Push)?;

        tracing::debug!("pushed image");
        Ok(())
    }

    fn image(&self, reference: &str) -> Result<Descriptor, ProviderError> {
        self.images
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(reference.to_owned()))
    }

    fn content_store(&self) -> Arc<dyn ContentStore> {
        Arc::clone(&self.store)
    }
}
