use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use tracing_error::SpanTrace;

use crate::Digest;

/// What went wrong in a content store operation, independent of which
/// store produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorKind {
    /// No committed blob exists for the digest.
    NotFound,

    /// A blob with the digest is already committed.
    AlreadyExists,

    /// Written bytes did not hash to the expected digest.
    ///
    /// The write is discarded; nothing becomes readable under either digest.
    DigestMismatch,

    /// Written bytes did not match the expected size.
    SizeMismatch,

    /// The digest is malformed or uses an unsupported algorithm.
    InvalidDigest,

    /// The store lacks permission to read or write its files.
    PermissionDenied,

    /// An I/O failure reading or writing the backing files or database.
    Io,

    /// Anything else.
    Other,
}

impl ContentErrorKind {
    /// Whether the data written was rejected during verification.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            ContentErrorKind::DigestMismatch | ContentErrorKind::SizeMismatch
        )
    }
}

impl fmt::Display for ContentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentErrorKind::NotFound => write!(f, "not found"),
            ContentErrorKind::AlreadyExists => write!(f, "already exists"),
            ContentErrorKind::DigestMismatch => write!(f, "digest mismatch"),
            ContentErrorKind::SizeMismatch => write!(f, "size mismatch"),
            ContentErrorKind::InvalidDigest => write!(f, "invalid digest"),
            ContentErrorKind::PermissionDenied => write!(f, "permission denied"),
            ContentErrorKind::Io => write!(f, "I/O error"),
            ContentErrorKind::Other => write!(f, "other error"),
        }
    }
}

impl From<io::ErrorKind> for ContentErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ContentErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ContentErrorKind::AlreadyExists,
            io::ErrorKind::PermissionDenied => ContentErrorKind::PermissionDenied,
            _ => ContentErrorKind::Io,
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// Error from a [`ContentStore`](crate::ContentStore).
///
/// Carries the semantic [`ContentErrorKind`], the name of the store engine,
/// the digest involved (when there is one), and the span trace at the point
/// the error was created.
///
/// ```rust
/// use content::{ContentError, ContentErrorKind, Digest};
///
/// let digest = Digest::from_bytes(b"layer");
/// let err = ContentError::builder(
///     "local",
///     ContentErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such blob"),
/// )
/// .digest(&digest)
/// .context("open blob")
/// .build();
///
/// assert!(err.is_not_found());
/// assert_eq!(err.digest(), Some(digest.as_str()));
/// ```
#[derive(Debug)]
pub struct ContentError {
    kind: ContentErrorKind,
    engine: &'static str,
    digest: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for ContentError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl ContentError {
    /// Create a new error with no digest or context.
    pub fn new<E>(engine: &'static str, kind: ContentErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Create an error from an I/O failure, deriving the kind from the
    /// I/O error kind.
    pub fn io(engine: &'static str, error: io::Error) -> ContentErrorBuilder {
        Self::builder(engine, error.kind().into(), error)
    }

    /// Start building an error with optional digest and context.
    pub fn builder<E>(engine: &'static str, kind: ContentErrorKind, error: E) -> ContentErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        ContentErrorBuilder {
            kind,
            engine,
            source: error.into(),
            digest: None,
            context: None,
        }
    }

    /// A `NotFound` error for `digest`.
    pub fn not_found(engine: &'static str, digest: &Digest) -> Self {
        Self::builder(
            engine,
            ContentErrorKind::NotFound,
            format!("content {digest} not found"),
        )
        .digest(digest)
        .build()
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ContentErrorKind {
        self.kind
    }

    /// Returns the name of the store engine that raised the error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the digest involved, if any.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Returns additional context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether the error means the content does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == ContentErrorKind::NotFound
    }

    /// Whether the error means the content already exists.
    pub fn is_already_exists(&self) -> bool {
        self.kind == ContentErrorKind::AlreadyExists
    }

    /// The captured backtrace, subject to `RUST_BACKTRACE`.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// The tracing span context where the error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content error [{}] from {}", self.kind, self.engine)?;

        if let Some(digest) = &self.digest {
            write!(f, " (digest: {})", digest)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for [`ContentError`], created by [`ContentError::builder`].
#[derive(Debug)]
pub struct ContentErrorBuilder {
    kind: ContentErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    digest: Option<String>,
    context: Option<String>,
}

impl ContentErrorBuilder {
    /// Set the digest involved.
    pub fn digest(mut self, digest: impl AsRef<str>) -> Self {
        self.digest = Some(digest.as_ref().to_owned());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the error, capturing traces at this point.
    #[track_caller]
    pub fn build(self) -> ContentError {
        ContentError {
            kind: self.kind,
            engine: self.engine,
            digest: self.digest,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

impl From<ContentErrorBuilder> for ContentError {
    #[track_caller]
    fn from(builder: ContentErrorBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kind_mapping() {
        let err = ContentError::io(
            "local",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        )
        .build();
        assert_eq!(err.kind(), ContentErrorKind::PermissionDenied);

        let err = ContentError::io("local", io::Error::other("disk on fire")).build();
        assert_eq!(err.kind(), ContentErrorKind::Io);
    }

    #[test]
    fn display_includes_context() {
        let digest = Digest::from_bytes(b"x");
        let err = ContentError::builder("local", ContentErrorKind::DigestMismatch, "bad bytes")
            .digest(&digest)
            .context("commit")
            .build();
        let message = err.to_string();
        assert!(message.contains("digest mismatch"));
        assert!(message.contains(digest.as_str()));
        assert!(message.contains("(commit)"));
        assert!(message.ends_with(": bad bytes"));
        assert!(err.kind().is_verification_failure());
    }
}
