//! Image manifests and indexes.

use std::collections::BTreeMap;

use content::{Descriptor, Digest};
use serde::{Deserialize, Serialize};

use crate::RemoteError;

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker schema 2 manifest.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker schema 2 manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// Media types requested when fetching a manifest.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] =
    &[OCI_INDEX, OCI_MANIFEST, DOCKER_MANIFEST_LIST, DOCKER_MANIFEST];

/// The two shapes of manifest an image graph is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Points at a config and layers.
    Image,
    /// Points at per-platform manifests.
    Index,
}

impl ManifestKind {
    /// Classify a media type, `None` for anything that is not a walkable
    /// manifest.
    pub fn of(media_type: &str) -> Option<Self> {
        match media_type {
            OCI_MANIFEST | DOCKER_MANIFEST => Some(ManifestKind::Image),
            OCI_INDEX | DOCKER_MANIFEST_LIST => Some(ManifestKind::Index),
            _ => None,
        }
    }

    /// Like [`ManifestKind::of`], but unknown media types are an error.
    pub fn require(media_type: &str) -> Result<Self, RemoteError> {
        Self::of(media_type).ok_or_else(|| RemoteError::UnsupportedMediaType(media_type.to_owned()))
    }
}

/// Guess the media type of a manifest from its body.
///
/// Registries do not always send a usable `Content-Type`, so the embedded
/// `mediaType` field wins, followed by the schema version and shape.
pub fn detect_media_type(data: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Some(media_type) = json.get("mediaType").and_then(|v| v.as_str()) {
            return media_type.to_string();
        }

        let is_index = json.get("manifests").is_some();
        match json.get("schemaVersion").and_then(|v| v.as_u64()) {
            Some(1) => return DOCKER_MANIFEST_V1.to_string(),
            Some(2) if is_index => return OCI_INDEX.to_string(),
            _ => {}
        }
    }

    OCI_MANIFEST.to_string()
}

/// An image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2.
    pub schema_version: u32,

    /// Media type of the manifest itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// The image configuration blob.
    pub config: Descriptor,

    /// Filesystem layers, base first.
    #[serde(default)]
    pub layers: Vec<Descriptor>,

    /// Arbitrary annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// An image index (manifest list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Always 2.
    pub schema_version: u32,

    /// Media type of the index itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Per-platform manifests.
    pub manifests: Vec<Descriptor>,

    /// Arbitrary annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// A decoded manifest of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// An image manifest.
    Image(ImageManifest),
    /// An image index.
    Index(ImageIndex),
}

impl Manifest {
    /// Decode the manifest described by `desc`.
    pub fn parse(desc: &Descriptor, data: &[u8]) -> Result<Self, RemoteError> {
        let malformed = |source| RemoteError::Manifest {
            digest: desc.digest.to_string(),
            source,
        };

        Ok(match ManifestKind::require(&desc.media_type)? {
            ManifestKind::Image => Manifest::Image(serde_json::from_slice(data).map_err(malformed)?),
            ManifestKind::Index => Manifest::Index(serde_json::from_slice(data).map_err(malformed)?),
        })
    }

    /// Descriptors this manifest points at, in document order.
    pub fn children(&self) -> Vec<&Descriptor> {
        match self {
            Manifest::Image(image) => std::iter::once(&image.config)
                .chain(image.layers.iter())
                .collect(),
            Manifest::Index(index) => index.manifests.iter().collect(),
        }
    }

    /// Labels recording which blobs this manifest keeps alive.
    ///
    /// Uses the containerd garbage collection label names so a store shared
    /// with containerd tooling sees the same references.
    pub fn gc_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        match self {
            Manifest::Image(image) => {
                labels.insert(
                    "containerd.io/gc.ref.content.config".to_owned(),
                    image.config.digest.to_string(),
                );
                for (i, layer) in image.layers.iter().enumerate() {
                    labels.insert(
                        format!("containerd.io/gc.ref.content.l.{i}"),
                        layer.digest.to_string(),
                    );
                }
            }
            Manifest::Index(index) => {
                for (i, manifest) in index.manifests.iter().enumerate() {
                    labels.insert(
                        format!("containerd.io/gc.ref.content.m.{i}"),
                        manifest.digest.to_string(),
                    );
                }
            }
        }
        labels
    }
}

/// Check that `data` hashes to `expected`.
pub(crate) fn verify(expected: &Digest, data: &[u8]) -> Result<(), RemoteError> {
    let actual = Digest::from_bytes(data);
    if &actual != expected {
        return Err(RemoteError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "size": 512,
                "platform": { "os": "linux", "architecture": "amd64" }
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "size": 498,
                "platform": { "os": "linux", "architecture": "arm64", "variant": "v8" }
            }
        ]
    }"#;

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
            "size": 1024
        },
        "layers": [
            {
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": "sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd",
                "size": 2048
            }
        ]
    }"#;

    #[test]
    fn detect_types() {
        assert_eq!(detect_media_type(INDEX.as_bytes()), OCI_INDEX);
        assert_eq!(detect_media_type(MANIFEST.as_bytes()), OCI_MANIFEST);
        assert_eq!(
            detect_media_type(br#"{"schemaVersion": 2, "manifests": []}"#),
            OCI_INDEX
        );
        assert_eq!(detect_media_type(br#"{"schemaVersion": 1}"#), DOCKER_MANIFEST_V1);
        assert_eq!(detect_media_type(b"not json"), OCI_MANIFEST);
    }

    #[test]
    fn parse_index() {
        let desc = Descriptor::for_bytes(OCI_INDEX, INDEX.as_bytes());
        let Manifest::Index(index) = Manifest::parse(&desc, INDEX.as_bytes()).unwrap() else {
            panic!("expected an index");
        };
        assert_eq!(index.manifests.len(), 2);
        let arm = index.manifests[1].platform.as_ref().unwrap();
        assert_eq!(arm.variant.as_deref(), Some("v8"));
    }

    #[test]
    fn parse_manifest_children_and_labels() {
        let desc = Descriptor::for_bytes(DOCKER_MANIFEST, MANIFEST.as_bytes());
        let manifest = Manifest::parse(&desc, MANIFEST.as_bytes()).unwrap();

        let children = manifest.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].size, 1024);

        let labels = manifest.gc_labels();
        assert_eq!(labels.len(), 2);
        assert!(labels["containerd.io/gc.ref.content.config"].starts_with("sha256:ccc"));
        assert!(labels["containerd.io/gc.ref.content.l.0"].starts_with("sha256:ddd"));
    }

    #[test]
    fn unsupported_and_malformed() {
        let desc = Descriptor::for_bytes(DOCKER_MANIFEST_V1, b"{}");
        assert!(matches!(
            Manifest::parse(&desc, b"{}"),
            Err(RemoteError::UnsupportedMediaType(_))
        ));

        let desc = Descriptor::for_bytes(OCI_MANIFEST, b"{}");
        assert!(matches!(
            Manifest::parse(&desc, b"{}"),
            Err(RemoteError::Manifest { .. })
        ));
    }

    #[test]
    fn verify_digest() {
        let digest = Digest::from_bytes(b"manifest");
        assert!(verify(&digest, b"manifest").is_ok());
        assert!(matches!(
            verify(&digest, b"tampered"),
            Err(RemoteError::DigestMismatch { .. })
        ));
    }
}
