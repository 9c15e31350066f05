use deadpool_sqlite::InteractError;

/// A [std::result::Result] whose error type defaults to [Error].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can be returned from the queue.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error occurred while updating the database to a new schema version.
    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    /// An error occurred while opening the database.
    #[error("Error opening database: {0}")]
    OpenDatabase(eyre::Report),
    /// Failed to acquire a database connection.
    #[error("Error acquiring database connection: {0}")]
    PoolError(#[from] deadpool_sqlite::PoolError),
    /// Encountered an error communicating with the database.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// The database contained invalid data.
    #[error("Unexpected value type for {1}: {0}")]
    ColumnType(#[source] rusqlite::Error, &'static str),
    /// An internal error occurred while running a database operation.
    #[error("Internal error: {0}")]
    DbInteract(String),
    /// The requested job was not found.
    #[error("Job not found")]
    NotFound,
    /// Failed to serialize a job into a payload.
    #[error("Error processing payload: {0}")]
    PayloadError(serde_json::Error),
    /// A stored payload could not be turned back into a known job.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// Invalid value for a job timestamp
    #[error("Timestamp {0} out of range")]
    TimestampOutOfRange(&'static str),
}

impl From<InteractError> for Error {
    fn from(e: InteractError) -> Self {
        Error::DbInteract(e.to_string())
    }
}

impl Error {
    pub(crate) fn open_database(err: impl Into<eyre::Report>) -> Self {
        Error::OpenDatabase(err.into())
    }

    pub(crate) fn invalid_payload(reason: impl std::fmt::Display) -> Self {
        Error::InvalidPayload(reason.to_string())
    }

    /// Returns true if the error came from the storage layer itself (connectivity, locking, or a
    /// failed transaction) rather than from the contents of a job.
    ///
    /// A worker should stop when it sees one of these instead of spinning against a broken store.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Error::PoolError(_) | Error::Database(_) | Error::DbInteract(_)
        )
    }
}
