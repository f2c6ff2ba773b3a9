#![allow(dead_code)]

use std::{
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use blockvault_container::{
    encode_header,
    layout::{entry_width, HEADER_PREFIX_LEN},
    BlockLocation,
};
use blockvault_core::{
    catalog::{CatalogOptions, CatalogRefresher},
    files::LocalBlockFiles,
    retrieval::{BlockStream, RetrievalOptions, RetrievalPipeline},
    store::{MetadataStore, MetadataStoreOptions},
};
use blockvault_object_storage::{
    ContainerObject, ObjectRangeSource, ObjectStoreRangeSource, RangeStream, StorageError,
    StorageResult,
};
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use futures::{StreamExt, TryStreamExt};
use object_store::{memory::InMemory, path::Path, ObjectStore, PutPayload};

pub const PREFIX: &str = "packed";

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn block_json(number: u64) -> Vec<u8> {
    let txs: Vec<String> = (0..64).map(|i| format!("\"0x{:04x}{:04x}\"", number, i)).collect();
    format!("{{\"number\":{},\"transactions\":[{}]}}", number, txs.join(",")).into_bytes()
}

/// A container file whose payload section holds the given blocks already
/// compressed, back to back after the header.
pub fn container_with_payloads(hash_length: u16, blocks: &[(u64, &str, Vec<u8>)]) -> Vec<u8> {
    let header_len = HEADER_PREFIX_LEN + blocks.len() * entry_width(hash_length);
    let mut offset = header_len as u64;
    let mut entries = Vec::new();

    for (number, hash, payload) in blocks {
        let len = payload.len() as u64;
        entries.push(BlockLocation {
            block_number: *number,
            block_hash: hash.to_string(),
            start: offset,
            end: offset + len - 1,
        });
        offset += len;
    }

    let mut bytes = encode_header(hash_length, &entries).unwrap();
    assert_eq!(bytes.len(), header_len);
    for (_, _, payload) in blocks {
        bytes.extend_from_slice(payload);
    }
    bytes
}

/// Container with every block gzip-compressed.
pub fn container(hash_length: u16, blocks: &[(u64, &str, &[u8])]) -> Vec<u8> {
    let compressed: Vec<_> = blocks
        .iter()
        .map(|(number, hash, data)| (*number, *hash, gzip(data)))
        .collect();
    container_with_payloads(hash_length, &compressed)
}

/// Range source that counts streamed fetches, re-chunks them into small
/// pieces and can be told to fail.
#[derive(Debug)]
pub struct CountingSource {
    inner: ObjectStoreRangeSource,
    chunk_size: usize,
    streams: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingSource {
    pub fn new(store: Arc<dyn ObjectStore>, chunk_size: usize) -> Self {
        Self {
            inner: ObjectStoreRangeSource::new(store),
            chunk_size,
            streams: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn stream_fetches(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn fail_next_streams(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ObjectRangeSource for CountingSource {
    async fn list_containers(&self, prefix: &str) -> StorageResult<Vec<ContainerObject>> {
        self.inner.list_containers(prefix).await
    }

    async fn fetch_range_bytes(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        self.inner.fetch_range_bytes(key, start, end).await
    }

    async fn fetch_range_stream(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<RangeStream> {
        self.streams.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::UpstreamFetch {
                key: key.to_string(),
                start,
                end,
                source: object_store::Error::Generic {
                    store: "test",
                    source: "injected failure".into(),
                },
            });
        }

        let whole: Vec<Bytes> = self
            .inner
            .fetch_range_stream(key, start, end)
            .await?
            .try_collect()
            .await?;
        let whole = Bytes::from(whole.concat());

        let chunk_size = self.chunk_size;
        let chunks: Vec<StorageResult<Bytes>> = (0..whole.len())
            .step_by(chunk_size)
            .map(|at| Ok(whole.slice(at..(at + chunk_size).min(whole.len()))))
            .collect();

        Ok(futures::stream::iter(chunks).boxed())
    }
}

pub struct Harness {
    pub objects: Arc<InMemory>,
    pub source: Arc<CountingSource>,
    pub store: Arc<MetadataStore>,
    pub files: LocalBlockFiles,
    pub pipeline: Arc<RetrievalPipeline>,
    pub refresher: CatalogRefresher,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(options: RetrievalOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalBlockFiles::new(dir.path());
        let objects = Arc::new(InMemory::new());
        let source = Arc::new(CountingSource::new(objects.clone(), 5));
        let store = Arc::new(MetadataStore::new(MetadataStoreOptions::default()));

        let pipeline = Arc::new(RetrievalPipeline::new(
            source.clone(),
            store.clone(),
            files.clone(),
            options,
        ));
        let refresher = CatalogRefresher::new(
            source.clone(),
            store.clone(),
            files.clone(),
            CatalogOptions {
                prefix: PREFIX.to_string(),
                interval: Duration::from_secs(300),
            },
        );

        Self {
            objects,
            source,
            store,
            files,
            pipeline,
            refresher,
            _dir: dir,
        }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects
            .put(&Path::from(key), PutPayload::from(bytes))
            .await
            .unwrap();
    }
}

pub async fn collect(stream: BlockStream) -> Vec<u8> {
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
