use std::error::Error as StdError;

use remote::RemoteError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors returned by a [`crate::Provider`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The content store or metadata database could not be opened.
    #[error("{context}")]
    StorageInit {
        /// The step that failed.
        context: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// Host configuration could not be resolved for a reference.
    #[error(transparent)]
    Resolution(RemoteError),

    /// Fetching an image failed.
    #[error("pull source image")]
    Pull(#[source] RemoteError),

    /// Pushing an image failed.
    #[error("push image")]
    Push(#[source] RemoteError),

    /// No image has been pulled under this reference.
    #[error("image {0} not found")]
    NotFound(String),
}

impl ProviderError {
    pub(crate) fn storage<E>(context: impl Into<String>) -> impl FnOnce(E) -> Self
    where
        E: Into<BoxError>,
    {
        let context = context.into();
        move |error| ProviderError::StorageInit {
            context,
            source: error.into(),
        }
    }

    /// Whether this is [`ProviderError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}
