use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

/// Composite identity of a block, rendered as `"{number}-{hash}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    number: u64,
    hash: String,
}

impl BlockKey {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }

    pub fn block_number(&self) -> u64 {
        self.number
    }

    pub fn block_hash(&self) -> &str {
        &self.hash
    }
}

impl Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number, self.hash)
    }
}

/// Lifecycle of a catalogued block. A key missing from the store is unlisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    /// Known location, nothing on local disk, nobody extracting.
    Located,
    /// Exactly one request holds the right to extract it.
    Claimed,
    /// Decompressed copy available at this path.
    Materialized(PathBuf),
}

/// Where a block lives and how far along its extraction is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    /// Object key of the container holding the compressed block.
    pub container: String,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub state: BlockState,
}

impl BlockRecord {
    pub fn located(container: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            container: container.into(),
            start,
            end,
            state: BlockState::Located,
        }
    }

    pub fn with_state(mut self, state: BlockState) -> Self {
        self.state = state;
        self
    }

    pub fn local_file_path(&self) -> Option<&Path> {
        match &self.state {
            BlockState::Materialized(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self.state, BlockState::Claimed)
    }
}
