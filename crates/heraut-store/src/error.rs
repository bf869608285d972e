use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// An insert collided with an existing primary or unique key.
    #[error("Record already exists")]
    AlreadyExists,

    /// Another account already uses this handle.
    #[error("Handle already taken: {0}")]
    HandleTaken(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored payload no longer forms a valid protocol object.
    #[error("Stored object is invalid: {0}")]
    Model(#[from] heraut_shared::ModelError),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a unique/primary key violation to [`StoreError::AlreadyExists`].
pub(crate) fn map_insert_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::AlreadyExists
        }
        _ => StoreError::Sqlite(err),
    }
}

/// Map "no rows" to [`StoreError::NotFound`].
pub(crate) fn map_lookup_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}
