use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use camino::{Utf8Path, Utf8PathBuf};
use content::{ContentStore, Descriptor};
use parking_lot::Mutex;
use provider::{LocalProvider, Provider, ProviderError};
use remote::{
    manifest::OCI_MANIFEST, FetchedImage, HostConfig, Only, RemoteContext, RemoteError,
    StaticHosts, Transferrer,
};

/// Serves canned manifests instead of talking to a registry.
#[derive(Debug, Default)]
struct FakeTransferrer {
    images: Mutex<HashMap<String, Vec<u8>>>,
    fail: AtomicBool,
    pushes: Mutex<Vec<(Descriptor, String)>>,
    schemes: Mutex<Vec<&'static str>>,
}

impl FakeTransferrer {
    fn serve(&self, reference: &str, body: &str) {
        self.images
            .lock()
            .insert(reference.to_owned(), body.as_bytes().to_vec());
    }
}

#[async_trait::async_trait]
impl Transferrer for FakeTransferrer {
    async fn fetch(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        reference: &str,
        _limit: usize,
    ) -> Result<FetchedImage, RemoteError> {
        self.schemes.lock().push(rctx.resolver.scheme());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::registry(
                format!("fetch manifest {reference}"),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "registry down"),
            ));
        }

        let body = self.images.lock().get(reference).cloned().ok_or_else(|| {
            RemoteError::registry(
                format!("fetch manifest {reference}"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "manifest unknown"),
            )
        })?;

        tokio::task::yield_now().await;
        let target = Descriptor::for_bytes(OCI_MANIFEST, &body);
        store.write_blob(&target, &body).await?;

        Ok(FetchedImage {
            name: reference.to_owned(),
            target,
        })
    }

    async fn push(
        &self,
        store: &dyn ContentStore,
        rctx: &RemoteContext,
        desc: &Descriptor,
        reference: &str,
    ) -> Result<(), RemoteError> {
        self.schemes.lock().push(rctx.resolver.scheme());
        store.info(&desc.digest).await?;
        self.pushes
            .lock()
            .push((desc.clone(), reference.to_owned()));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
    fake: Arc<FakeTransferrer>,
    provider: LocalProvider,
}

fn open(root: &Utf8Path, fake: Arc<FakeTransferrer>) -> LocalProvider {
    let (provider, _db) =
        LocalProvider::new(root, Arc::new(StaticHosts::new()), Arc::new(Only::host()))
            .expect("open provider");
    provider.with_transferrer(fake)
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
    let fake = Arc::new(FakeTransferrer::default());
    let provider = open(&root, fake.clone());
    Harness {
        _dir: dir,
        root,
        fake,
        provider,
    }
}

const ALPINE: &str = "docker.io/library/alpine:3.20";
const BUSYBOX: &str = "docker.io/library/busybox:1.36";

#[tokio::test]
async fn image_before_pull_is_not_found() {
    let h = harness();
    let err = h.provider.image(ALPINE).unwrap_err();
    assert!(matches!(&err, ProviderError::NotFound(r) if r == ALPINE));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn pull_records_target() {
    let h = harness();
    h.fake.serve(ALPINE, r#"{"schemaVersion":2,"alpine":1}"#);

    h.provider.pull(ALPINE).await.unwrap();

    let image = h.provider.image(ALPINE).unwrap();
    assert_eq!(
        image,
        Descriptor::for_bytes(OCI_MANIFEST, br#"{"schemaVersion":2,"alpine":1}"#)
    );
}

#[tokio::test]
async fn last_pull_wins() {
    let h = harness();

    h.fake.serve(ALPINE, "first");
    h.provider.pull(ALPINE).await.unwrap();
    let first = h.provider.image(ALPINE).unwrap();

    h.fake.serve(ALPINE, "second");
    h.provider.pull(ALPINE).await.unwrap();
    let second = h.provider.image(ALPINE).unwrap();

    assert_ne!(first, second);
    assert_eq!(second, Descriptor::for_bytes(OCI_MANIFEST, b"second"));
}

#[tokio::test]
async fn references_are_cached_verbatim() {
    let h = harness();
    h.fake.serve(ALPINE, "alpine");
    h.provider.pull(ALPINE).await.unwrap();

    // same image, different spelling
    assert!(h.provider.image("alpine:3.20").unwrap_err().is_not_found());
}

#[tokio::test]
async fn failed_pull_leaves_cache_alone() {
    let h = harness();
    h.fake.serve(ALPINE, "cached");
    h.provider.pull(ALPINE).await.unwrap();
    let cached = h.provider.image(ALPINE).unwrap();

    h.fake.serve(ALPINE, "never seen");
    h.fake.fail.store(true, Ordering::SeqCst);
    let err = h.provider.pull(ALPINE).await.unwrap_err();
    assert!(matches!(err, ProviderError::Pull(RemoteError::Registry { .. })));
    assert_eq!(err.to_string(), "pull source image");

    assert_eq!(h.provider.image(ALPINE).unwrap(), cached);

    // the provider stays usable
    h.fake.fail.store(false, Ordering::SeqCst);
    h.provider.pull(ALPINE).await.unwrap();
    assert_eq!(
        h.provider.image(ALPINE).unwrap(),
        Descriptor::for_bytes(OCI_MANIFEST, b"never seen")
    );
}

#[tokio::test]
async fn push_never_touches_cache() {
    let h = harness();
    h.fake.serve(ALPINE, "alpine");
    h.provider.pull(ALPINE).await.unwrap();
    let pulled = h.provider.image(ALPINE).unwrap();

    let mirror = "registry.local:5000/mirror/alpine:3.20";
    h.provider.push(&pulled, mirror).await.unwrap();
    h.provider.push(&pulled, ALPINE).await.unwrap();

    assert_eq!(h.provider.image(ALPINE).unwrap(), pulled);
    assert!(h.provider.image(mirror).unwrap_err().is_not_found());

    let pushes = h.fake.pushes.lock();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0], (pulled.clone(), mirror.to_owned()));
}

#[tokio::test]
async fn push_failure_is_wrapped() {
    let h = harness();
    let missing = Descriptor::for_bytes(OCI_MANIFEST, b"never pulled");

    let err = h.provider.push(&missing, ALPINE).await.unwrap_err();
    assert!(matches!(err, ProviderError::Push(RemoteError::Content(_))));
    assert_eq!(err.to_string(), "push image");
    assert!(h.provider.image(ALPINE).unwrap_err().is_not_found());
}

#[tokio::test]
async fn resolution_errors_surface_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();
    let hosts = |reference: &str| -> Result<HostConfig, RemoteError> {
        Err(RemoteError::Host {
            reference: reference.to_owned(),
            reason: "no route to registry".into(),
        })
    };

    let (provider, _db) =
        LocalProvider::new(root, Arc::new(hosts), Arc::new(Only::host())).unwrap();
    let fake = Arc::new(FakeTransferrer::default());
    let provider = provider.with_transferrer(fake.clone());

    let err = provider.resolver(ALPINE).unwrap_err();
    assert!(matches!(err, ProviderError::Resolution(RemoteError::Host { .. })));
    assert_eq!(
        err.to_string(),
        format!("resolve host for {ALPINE}: no route to registry")
    );

    let err = provider.pull(ALPINE).await.unwrap_err();
    assert!(matches!(err, ProviderError::Resolution(_)));

    let desc = Descriptor::for_bytes(OCI_MANIFEST, b"x");
    let err = provider.push(&desc, ALPINE).await.unwrap_err();
    assert!(matches!(err, ProviderError::Resolution(_)));

    // the transferrer is never reached
    assert!(fake.schemes.lock().is_empty());
}

#[test]
fn unwritable_work_dir_fails_init() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();
    let file = root.join("not-a-directory");
    std::fs::write(&file, b"occupied").unwrap();

    let result = LocalProvider::new(&file, Arc::new(StaticHosts::new()), Arc::new(Only::host()));
    match result {
        Err(ProviderError::StorageInit { context, .. }) => {
            assert!(context.contains("content"), "unexpected context {context}")
        }
        Err(other) => panic!("expected a storage init error, got {other:?}"),
        Ok(_) => panic!("provider opened in an unusable work dir"),
    }
}

#[tokio::test]
async fn content_store_reflects_pulls() {
    let h = harness();
    h.fake.serve(ALPINE, "alpine manifest");
    h.fake.serve(BUSYBOX, "busybox manifest");

    h.provider.pull(ALPINE).await.unwrap();
    h.provider.pull(BUSYBOX).await.unwrap();

    let store = h.provider.content_store();
    let alpine = h.provider.image(ALPINE).unwrap();
    assert_eq!(store.read_blob(&alpine.digest).await.unwrap(), b"alpine manifest");

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|info| info.digest == alpine.digest));
}

#[tokio::test]
async fn content_survives_restart() {
    let h = harness();
    h.fake.serve(ALPINE, "persistent");
    h.provider.pull(ALPINE).await.unwrap();
    let pulled = h.provider.image(ALPINE).unwrap();

    let Harness {
        _dir,
        root,
        fake,
        provider,
    } = h;
    drop(provider);

    let reopened = open(&root, fake);
    let store = reopened.content_store();
    assert!(store.contains(&pulled.digest).await.unwrap());
    assert_eq!(store.read_blob(&pulled.digest).await.unwrap(), b"persistent");

    // the reference cache lives only as long as the provider
    assert!(reopened.image(ALPINE).unwrap_err().is_not_found());
}

#[tokio::test]
async fn plain_http_applies_to_new_resolvers() {
    let h = harness();
    let before = h.provider.resolver(ALPINE).unwrap();
    assert_eq!(before.scheme(), "https");

    h.provider.use_plain_http();
    h.provider.use_plain_http();

    let after = h.provider.resolver(ALPINE).unwrap();
    assert_eq!(after.scheme(), "http");
    assert_eq!(before.scheme(), "https");

    h.fake.serve(ALPINE, "alpine");
    h.provider.pull(ALPINE).await.unwrap();
    assert_eq!(h.fake.schemes.lock().as_slice(), &["http"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pulls_and_lookups() {
    let h = harness();
    let references: Vec<String> = (0..16)
        .map(|i| format!("registry.local:5000/stress/image-{i}:latest"))
        .collect();
    for reference in &references {
        h.fake.serve(reference, reference);
    }

    let provider = Arc::new(h.provider);
    let mut tasks = Vec::new();
    for (i, reference) in references.iter().enumerate() {
        let provider = provider.clone();
        let reference = reference.clone();
        let other = references[(i + 1) % references.len()].clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..8 {
                provider.pull(&reference).await.unwrap();
                match provider.image(&other) {
                    Ok(desc) => {
                        assert_eq!(desc, Descriptor::for_bytes(OCI_MANIFEST, other.as_bytes()))
                    }
                    Err(err) => assert!(err.is_not_found()),
                }
            }
        }));
    }

    tokio::time::timeout(Duration::from_secs(60), async {
        for task in tasks {
            task.await.unwrap();
        }
    })
    .await
    .expect("pulls deadlocked");

    for reference in &references {
        assert_eq!(
            provider.image(reference).unwrap(),
            Descriptor::for_bytes(OCI_MANIFEST, reference.as_bytes())
        );
    }
}
