use std::{fmt::Debug, ops::Range, sync::Arc};

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use object_store::{path::Path, GetOptions, GetRange, ObjectStore};

use crate::error::{StorageError, StorageResult};

/// A container file found while listing the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObject {
    pub key: String,
    pub size: u64,
}

pub type RangeStream = BoxStream<'static, StorageResult<Bytes>>;

/// Narrow read-only view of the object store used by the catalog and the
/// retrieval pipeline. All ranges are inclusive on both ends.
#[async_trait::async_trait]
pub trait ObjectRangeSource: Debug + Send + Sync {
    async fn list_containers(&self, prefix: &str) -> StorageResult<Vec<ContainerObject>>;

    async fn fetch_range_bytes(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    async fn fetch_range_stream(&self, key: &str, start: u64, end: u64)
        -> StorageResult<RangeStream>;
}

#[derive(Debug, Clone)]
pub struct ObjectStoreRangeSource {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreRangeSource {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    fn location(key: &str, start: u64, end: u64) -> StorageResult<Path> {
        Path::parse(key).map_err(|e| StorageError::UpstreamFetch {
            key: key.to_string(),
            start,
            end,
            source: e.into(),
        })
    }
}

fn byte_range(key: &str, start: u64, end: u64) -> StorageResult<Range<usize>> {
    let invalid = || StorageError::InvalidRange {
        key: key.to_string(),
        start,
        end,
    };

    if end < start {
        return Err(invalid());
    }
    let start = usize::try_from(start).map_err(|_| invalid())?;
    let end = usize::try_from(end)
        .ok()
        .and_then(|end| end.checked_add(1))
        .ok_or_else(invalid)?;

    Ok(start..end)
}

#[async_trait::async_trait]
impl ObjectRangeSource for ObjectStoreRangeSource {
    async fn list_containers(&self, prefix: &str) -> StorageResult<Vec<ContainerObject>> {
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(Path::from(prefix))
        };

        let objects = self
            .inner
            .list(prefix_path.as_ref())
            .map_ok(|meta| ContainerObject {
                key: meta.location.to_string(),
                size: meta.size as u64,
            })
            .try_collect::<Vec<_>>()
            .await
            .map_err(|source| StorageError::Listing {
                prefix: prefix.to_string(),
                source,
            })?;

        tracing::debug!("Listed {} containers under '{}'", objects.len(), prefix);
        Ok(objects)
    }

    async fn fetch_range_bytes(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        let location = Self::location(key, start, end)?;
        let range = byte_range(key, start, end)?;

        self.inner
            .get_range(&location, range)
            .await
            .map_err(|source| {
                tracing::error!("Failed to get range {}-{} of {}: {}", start, end, key, source);
                StorageError::UpstreamFetch {
                    key: key.to_string(),
                    start,
                    end,
                    source,
                }
            })
    }

    async fn fetch_range_stream(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<RangeStream> {
        let location = Self::location(key, start, end)?;
        let range = byte_range(key, start, end)?;

        let options = GetOptions {
            range: Some(GetRange::Bounded(range)),
            ..Default::default()
        };

        let result = self
            .inner
            .get_opts(&location, options)
            .await
            .map_err(|source| {
                tracing::error!("Failed to open range {}-{} of {}: {}", start, end, key, source);
                StorageError::UpstreamFetch {
                    key: key.to_string(),
                    start,
                    end,
                    source,
                }
            })?;

        let key = key.to_string();
        let stream = result.into_stream().map_err(move |source| StorageError::UpstreamFetch {
            key: key.clone(),
            start,
            end,
            source,
        });

        Ok(stream.boxed())
    }
}
