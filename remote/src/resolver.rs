//! Registry resolver built from host configuration.

use std::{fmt, sync::Arc};

use content::{Descriptor, Digest};
use oci_distribution::{
    client::{ClientConfig, ClientProtocol},
    manifest::OciDescriptor,
    secrets::RegistryAuth,
    Client, Reference, RegistryOperation,
};
use tokio::io::AsyncWrite;

use crate::{
    credentials::CredentialProvider,
    hosts::parse_reference,
    manifest::{self, ACCEPTED_MANIFEST_TYPES},
    RemoteError,
};

/// Resolves references and moves manifests and blobs to and from one
/// registry host.
///
/// The transport is fixed when the resolver is built; later changes to the
/// provider's plain HTTP setting do not affect an existing resolver.
#[derive(Clone)]
pub struct Resolver {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    insecure: bool,
    plain_http: bool,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("scheme", &self.scheme())
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Build a resolver.
    ///
    /// `insecure` accepts invalid TLS certificates; `plain_http` drops TLS
    /// altogether.
    pub fn new(insecure: bool, plain_http: bool, credentials: Arc<dyn CredentialProvider>) -> Self {
        let protocol = if plain_http {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };

        let client = Client::new(ClientConfig {
            protocol,
            accept_invalid_certificates: insecure,
            ..Default::default()
        });

        Self {
            client,
            credentials,
            insecure,
            plain_http,
        }
    }

    /// URL scheme used for registry requests.
    pub fn scheme(&self) -> &'static str {
        if self.plain_http {
            "http"
        } else {
            "https"
        }
    }

    /// Whether invalid TLS certificates are accepted.
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    fn auth(&self, reference: &Reference) -> Result<RegistryAuth, RemoteError> {
        Ok(self
            .credentials
            .credentials(reference.registry())?
            .to_registry_auth())
    }

    /// Resolve `reference` to the name and descriptor of its top-level
    /// manifest.
    #[tracing::instrument(skip(self), fields(scheme = self.scheme()))]
    pub async fn resolve(&self, reference: &str) -> Result<(String, Descriptor), RemoteError> {
        let parsed = parse_reference(reference)?;
        let (desc, _) = self.fetch_root(&parsed).await?;
        Ok((parsed.whole(), desc))
    }

    /// Fetch the top-level manifest of `reference`, returning its descriptor
    /// and body.
    pub(crate) async fn fetch_root(
        &self,
        reference: &Reference,
    ) -> Result<(Descriptor, Vec<u8>), RemoteError> {
        let auth = self.auth(reference)?;
        let (data, _) = self
            .client
            .pull_manifest_raw(reference, &auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|err| RemoteError::registry(format!("fetch manifest {reference}"), err))?;

        let digest = Digest::from_bytes(&data);
        if let Some(pinned) = reference.digest() {
            if pinned != digest.as_str() {
                return Err(RemoteError::DigestMismatch {
                    expected: pinned.to_owned(),
                    actual: digest.to_string(),
                });
            }
        }

        let desc = Descriptor::new(
            manifest::detect_media_type(&data),
            digest,
            data.len() as u64,
        );
        tracing::debug!(digest = %desc.digest, media_type = %desc.media_type, "resolved");
        Ok((desc, data))
    }

    /// Fetch the manifest `desc` from the repository of `reference`.
    pub(crate) async fn fetch_manifest(
        &self,
        reference: &Reference,
        desc: &Descriptor,
    ) -> Result<Vec<u8>, RemoteError> {
        let by_digest = pinned(reference, &desc.digest);
        let auth = self.auth(reference)?;
        let (data, _) = self
            .client
            .pull_manifest_raw(&by_digest, &auth, &[desc.media_type.as_str()])
            .await
            .map_err(|err| RemoteError::registry(format!("fetch manifest {by_digest}"), err))?;

        manifest::verify(&desc.digest, &data)?;
        Ok(data)
    }

    /// Stream the blob `desc` from the repository of `reference` into `out`.
    ///
    /// The bytes are not verified here; the content store checks them on
    /// commit.
    pub(crate) async fn fetch_blob<W>(
        &self,
        reference: &Reference,
        desc: &Descriptor,
        out: W,
    ) -> Result<(), RemoteError>
    where
        W: AsyncWrite + Unpin,
    {
        self.client
            .pull_blob(reference, &oci_descriptor(desc), out)
            .await
            .map_err(|err| RemoteError::registry(format!("fetch blob {}", desc.digest), err))
    }

    /// Authenticate for pushing to the repository of `reference`.
    pub(crate) async fn authorize_push(&self, reference: &Reference) -> Result<(), RemoteError> {
        let auth = self.auth(reference)?;
        self.client
            .auth(reference, &auth, RegistryOperation::Push)
            .await
            .map_err(|err| RemoteError::registry(format!("authorize push to {reference}"), err))?;
        Ok(())
    }

    /// Upload a blob to the repository of `reference`.
    pub(crate) async fn push_blob(
        &self,
        reference: &Reference,
        desc: &Descriptor,
        data: &[u8],
    ) -> Result<(), RemoteError> {
        self.client
            .push_blob(reference, data, desc.digest.as_str())
            .await
            .map_err(|err| RemoteError::registry(format!("push blob {}", desc.digest), err))?;
        Ok(())
    }

    /// Upload a manifest, tagged as `reference`.
    pub(crate) async fn push_manifest(
        &self,
        reference: &Reference,
        desc: &Descriptor,
        data: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let content_type = http::HeaderValue::from_str(&desc.media_type)
            .map_err(|err| RemoteError::registry(format!("media type {}", desc.media_type), err))?;

        self.client
            .push_manifest_raw(reference, data, content_type)
            .await
            .map_err(|err| RemoteError::registry(format!("push manifest {reference}"), err))?;
        Ok(())
    }
}

/// `reference` with its tag replaced by `digest`.
pub(crate) fn pinned(reference: &Reference, digest: &Digest) -> Reference {
    Reference::with_digest(
        reference.registry().to_owned(),
        reference.repository().to_owned(),
        digest.to_string(),
    )
}

fn oci_descriptor(desc: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: desc.media_type.clone(),
        digest: desc.digest.to_string(),
        size: i64::try_from(desc.size).unwrap_or(i64::MAX),
        urls: desc.urls.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use crate::Credentials;

    use super::*;

    #[test]
    fn scheme_follows_plain_http() {
        let creds: Arc<dyn CredentialProvider> = Arc::new(Credentials::Anonymous);
        assert_eq!(Resolver::new(false, false, creds.clone()).scheme(), "https");
        assert_eq!(Resolver::new(false, true, creds.clone()).scheme(), "http");
        assert!(Resolver::new(true, false, creds).is_insecure());
    }

    #[tokio::test]
    async fn invalid_reference_fails_before_network() {
        let resolver = Resolver::new(false, false, Arc::new(Credentials::Anonymous));
        let err = resolver.resolve("not a valid reference!!!").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidReference { .. }));
    }

    #[test]
    fn pinned_reference_keeps_repository() {
        let reference: Reference = "ghcr.io/owner/image:latest".parse().unwrap();
        let digest = Digest::from_bytes(b"manifest");
        let by_digest = pinned(&reference, &digest);
        assert_eq!(by_digest.registry(), "ghcr.io");
        assert_eq!(by_digest.repository(), "owner/image");
        assert_eq!(by_digest.digest(), Some(digest.as_str()));
    }

    #[test]
    fn credential_errors_surface() {
        let resolver = Resolver::new(
            false,
            false,
            Arc::new(|host: &str| -> Result<Credentials, RemoteError> {
                Err(RemoteError::Credentials {
                    host: host.to_owned(),
                    reason: "locked".into(),
                })
            }),
        );
        let reference: Reference = "ghcr.io/owner/image:latest".parse().unwrap();
        assert!(matches!(
            resolver.auth(&reference),
            Err(RemoteError::Credentials { host, .. }) if host == "ghcr.io"
        ));
    }
}
