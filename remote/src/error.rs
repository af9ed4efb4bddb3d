use std::error::Error as StdError;

use content::ContentError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors talking to a registry or walking an image graph.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The reference could not be parsed.
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference {
        /// The reference as given.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The registry rejected a request or could not be reached.
    #[error("{context}")]
    Registry {
        /// What was being attempted.
        context: String,
        /// The underlying client error.
        #[source]
        source: BoxError,
    },

    /// Credentials for a host could not be produced.
    #[error("credentials for {host}: {reason}")]
    Credentials {
        /// Registry host.
        host: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// No host configuration applies to a reference.
    #[error("resolve host for {reference}: {reason}")]
    Host {
        /// The reference being resolved.
        reference: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A manifest had a media type this crate cannot walk.
    #[error("unsupported media type {0}")]
    UnsupportedMediaType(String),

    /// A manifest body could not be decoded.
    #[error("malformed manifest {digest}")]
    Manifest {
        /// Digest of the offending manifest.
        digest: String,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The registry served content that does not hash to what was asked for.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest that was requested.
        expected: String,
        /// Digest of the received bytes.
        actual: String,
    },

    /// The local content store failed.
    #[error(transparent)]
    Content(#[from] ContentError),
}

impl RemoteError {
    /// Wrap a registry client failure with what was being attempted.
    pub fn registry<E>(context: impl Into<String>, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        RemoteError::Registry {
            context: context.into(),
            source: error.into(),
        }
    }

    pub(crate) fn host(reference: &str, reason: impl Into<String>) -> Self {
        RemoteError::Host {
            reference: reference.to_owned(),
            reason: reason.into(),
        }
    }
}
