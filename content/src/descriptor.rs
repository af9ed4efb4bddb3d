//! OCI content descriptors and platforms.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::Digest;

/// Identifies a piece of content by digest, size and media type.
///
/// Uses the JSON field names from the OCI image specification, so a
/// descriptor can be read straight out of a manifest or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,

    /// Digest of the referenced content.
    pub digest: Digest,

    /// Size of the referenced content in bytes.
    pub size: u64,

    /// Alternate locations the content may be downloaded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    /// Arbitrary annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Platform the content targets, only set for entries of an image index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// Create a descriptor with no optional metadata.
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            urls: None,
            annotations: None,
            platform: None,
        }
    }

    /// Create a descriptor describing `data`.
    pub fn for_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, Digest::from_bytes(data), data.len() as u64)
    }

    /// Attach a platform to the descriptor.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

/// The platform an image manifest was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,

    /// CPU architecture, e.g. `amd64`.
    pub architecture: String,

    /// CPU variant, e.g. `v8` for `arm64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Create a new platform, normalising the os and architecture names.
    pub fn new(os: impl AsRef<str>, architecture: impl AsRef<str>) -> Self {
        Self {
            os: normalize_os(os.as_ref()),
            architecture: normalize_arch(architecture.as_ref()),
            variant: None,
        }
    }

    /// Set the cpu variant.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Parse an `os/arch[/variant]` specifier such as `linux/arm64/v8`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('/');
        let os = parts.next().filter(|p| !p.is_empty())?;
        let arch = parts.next().filter(|p| !p.is_empty())?;
        let variant = parts.next().filter(|p| !p.is_empty());
        if parts.next().is_some() {
            return None;
        }

        let platform = Self::new(os, arch);
        Some(match variant {
            Some(variant) => platform.with_variant(variant.to_lowercase()),
            None => platform,
        })
    }

    /// The platform of the running process.
    pub fn host() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

fn normalize_os(os: &str) -> String {
    match os.to_lowercase().as_str() {
        "macos" | "osx" => "darwin".to_owned(),
        other => other.to_owned(),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_lowercase().as_str() {
        "x86_64" | "x86-64" => "amd64".to_owned(),
        "aarch64" => "arm64".to_owned(),
        "i386" | "i686" | "x86" => "386".to_owned(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_and_normalize() {
        let p = Platform::parse("linux/x86_64").unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "amd64");
        assert_eq!(p.variant, None);

        let p = Platform::parse("macos/aarch64/V8").unwrap();
        assert_eq!(p.to_string(), "darwin/arm64/v8");

        assert!(Platform::parse("linux").is_none());
        assert!(Platform::parse("linux/").is_none());
        assert!(Platform::parse("linux/arm/v7/extra").is_none());
    }

    #[test]
    fn host_platform_is_normalized() {
        let p = Platform::host();
        assert!(!p.os.is_empty());
        assert_ne!(p.architecture, "x86_64");
        assert_ne!(p.architecture, "aarch64");
    }

    #[test]
    fn descriptor_json_shape() {
        let desc = Descriptor::for_bytes("application/vnd.oci.image.manifest.v1+json", b"{}")
            .with_platform(Platform::new("linux", "amd64"));
        let json = serde_json::to_value(&desc).unwrap();

        assert_eq!(json["mediaType"], "application/vnd.oci.image.manifest.v1+json");
        assert_eq!(json["size"], 2);
        assert_eq!(json["platform"]["architecture"], "amd64");
        assert!(json.get("urls").is_none());

        let back: Descriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }
}
