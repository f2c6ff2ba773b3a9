#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Failed to fetch bytes {start}-{end} of {key}: {source}")]
    UpstreamFetch {
        key: String,
        start: u64,
        end: u64,
        #[source]
        source: object_store::Error,
    },
    #[error("Failed to list containers under '{prefix}': {source}")]
    Listing {
        prefix: String,
        #[source]
        source: object_store::Error,
    },
    #[error("Byte range {start}-{end} of {key} cannot be requested")]
    InvalidRange { key: String, start: u64, end: u64 },
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
