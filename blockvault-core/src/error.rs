use std::path::PathBuf;

use blockvault_container::HeaderError;
use blockvault_object_storage::StorageError;

use crate::record::BlockKey;

pub type BlockResult<T> = Result<T, BlockError>;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("Unknown block {0}")]
    NotFound(BlockKey),
    #[error("Timed out waiting for block {0} to be extracted")]
    Timeout(BlockKey),
    #[error("Object store error: {0}")]
    Upstream(#[from] StorageError),
    #[error("Local I/O error on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed header in container {container}: {source}")]
    MalformedHeader {
        container: String,
        #[source]
        source: HeaderError,
    },
    #[error("Block {key} does not decompress: {source}")]
    Corrupt {
        key: BlockKey,
        #[source]
        source: std::io::Error,
    },
}

impl BlockError {
    pub(crate) fn local_io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BlockError::LocalIo { path, source }
    }
}
