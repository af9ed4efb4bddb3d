use content::{ContentError, ContentErrorKind};

/// Errors from the metadata database.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// SQLite rejected a statement or could not open the database.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking database task panicked or was cancelled.
    #[error("metadata task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A stored row could not be decoded.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<MetadataError> for ContentError {
    fn from(err: MetadataError) -> Self {
        let kind = match &err {
            MetadataError::Io(io) => io.kind().into(),
            MetadataError::Sqlite(_) => ContentErrorKind::Io,
            MetadataError::Task(_) | MetadataError::InvalidRecord(_) => ContentErrorKind::Other,
        };
        ContentError::new("metadata", kind, err)
    }
}
