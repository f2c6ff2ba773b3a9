use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

const FILE_PREFIX: &str = "uncompressed-";
const FILE_SUFFIX: &str = ".json";
const PARTIAL_SUFFIX: &str = ".partial";

/// Directory of decompressed blocks, one `uncompressed-{number}.json` file per
/// block number.
#[derive(Debug, Clone)]
pub struct LocalBlockFiles {
    dir: Arc<PathBuf>,
    next_partial: Arc<AtomicU64>,
}

impl LocalBlockFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Arc::new(dir.into()),
            next_partial: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(self.dir.as_path()).await
    }

    pub fn path_for(&self, block_number: u64) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", FILE_PREFIX, block_number, FILE_SUFFIX))
    }

    /// Fresh write target for one materialization of `block_number`.
    ///
    /// Hash variants of a number are claimed independently and may be written
    /// at the same time, so every call hands out a distinct name.
    pub fn partial_path_for(&self, block_number: u64) -> PathBuf {
        let seq = self.next_partial.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}{}{}.{}{}",
            FILE_PREFIX, block_number, FILE_SUFFIX, seq, PARTIAL_SUFFIX
        ))
    }

    /// Moves a finished partial file into place and returns the final path.
    /// The last writer of a number wins; the rename itself is atomic.
    pub async fn promote(&self, partial: &Path, block_number: u64) -> io::Result<PathBuf> {
        let path = self.path_for(block_number);
        tokio::fs::rename(partial, &path).await?;
        Ok(path)
    }

    /// Partial files currently in the directory, finished or abandoned.
    pub async fn partials(&self) -> io::Result<Vec<PathBuf>> {
        let mut partials = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir.as_path()).await?;

        while let Some(entry) = entries.next_entry().await? {
            let is_partial = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(PARTIAL_SUFFIX));
            if is_partial {
                partials.push(entry.path());
            }
        }

        Ok(partials)
    }

    /// Block numbers that currently have a materialized file.
    pub async fn snapshot(&self) -> io::Result<HashSet<u64>> {
        let mut numbers = HashSet::new();
        let mut entries = tokio::fs::read_dir(self.dir.as_path()).await?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(number) = entry.file_name().to_str().and_then(parse_file_name) {
                numbers.insert(number);
            }
        }

        Ok(numbers)
    }
}

fn parse_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}
