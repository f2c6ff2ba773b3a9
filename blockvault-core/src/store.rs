//! In-memory catalog of block locations keyed by [`BlockKey`].
//!
//! Besides answering lookups, the store is the only coordination point
//! between concurrent requests: [`MetadataStore::try_claim`] hands out the
//! right to extract a block to exactly one caller, and per-key wait lists let
//! the others sleep until that extraction settles.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use moka::{ops::compute::Op, policy::EvictionPolicy, sync::Cache};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::record::{BlockKey, BlockRecord, BlockState};

#[derive(Debug, Clone)]
pub struct MetadataStoreOptions {
    pub max_entries: u64,
    /// Entries are treated as absent this long after their last write.
    pub time_to_live: Duration,
}

impl Default for MetadataStoreOptions {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            time_to_live: Duration::from_secs(600),
        }
    }
}

/// Answer of [`MetadataStore::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Absent,
    Ready(BlockRecord),
    InProgress,
    /// The caller now owns the extraction. Holds the record as it was before the claim.
    Claimed(BlockRecord),
}

pub struct MetadataStore {
    records: Cache<BlockKey, BlockRecord>,
    watchers: Mutex<HashMap<BlockKey, Arc<Notify>>>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("entries", &self.records.entry_count())
            .finish()
    }
}

impl MetadataStore {
    pub fn new(options: MetadataStoreOptions) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(options.max_entries)
                .eviction_policy(EvictionPolicy::lru())
                .time_to_live(options.time_to_live)
                .build(),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &BlockKey) -> Option<BlockRecord> {
        self.records.get(key)
    }

    /// Unconditional overwrite. Restarts the entry's time to live.
    pub fn set(&self, key: BlockKey, record: BlockRecord) {
        let _ = self
            .records
            .entry(key)
            .and_compute_with(|_| Op::Put(record));
    }

    /// Inspects the record and, if nobody is extracting it yet, flips it to
    /// [`BlockState::Claimed`] in the same atomic step.
    pub fn try_claim(&self, key: &BlockKey) -> ClaimResult {
        let mut result = ClaimResult::Absent;

        let _ = self.records.entry_by_ref(key).and_compute_with(|entry| {
            let Some(entry) = entry else {
                return Op::Nop;
            };
            let record = entry.into_value();
            match record.state {
                BlockState::Materialized(_) => {
                    result = ClaimResult::Ready(record);
                    Op::Nop
                }
                BlockState::Claimed => {
                    result = ClaimResult::InProgress;
                    Op::Nop
                }
                BlockState::Located => {
                    let claimed = record.clone().with_state(BlockState::Claimed);
                    result = ClaimResult::Claimed(record);
                    Op::Put(claimed)
                }
            }
        });

        result
    }

    /// Marks a claimed block as materialized at `path`.
    ///
    /// Location fields written by a catalog refresh in the meantime are kept.
    /// `fallback` is re-inserted if the entry expired while extracting.
    pub fn complete(&self, key: &BlockKey, path: PathBuf, fallback: BlockRecord) {
        let _ = self.records.entry_by_ref(key).and_compute_with(|entry| {
            let record = entry.map(|e| e.into_value()).unwrap_or(fallback);
            Op::Put(record.with_state(BlockState::Materialized(path)))
        });
        self.wake(key);
    }

    /// Gives up a claim so the next request can retry the extraction.
    pub fn release(&self, key: &BlockKey) {
        let _ = self.records.entry_by_ref(key).and_compute_with(|entry| match entry {
            Some(entry) if entry.value().state == BlockState::Claimed => {
                Op::Put(entry.into_value().with_state(BlockState::Located))
            }
            _ => Op::Nop,
        });
        self.wake(key);
    }

    /// Forgets a materialized copy that is no longer on disk.
    pub fn demote(&self, key: &BlockKey) {
        let _ = self.records.entry_by_ref(key).and_compute_with(|entry| match entry {
            Some(entry) if matches!(entry.value().state, BlockState::Materialized(_)) => {
                Op::Put(entry.into_value().with_state(BlockState::Located))
            }
            _ => Op::Nop,
        });
    }

    /// Writes a catalog batch. Each key is merged atomically on its own:
    /// an extraction in flight keeps its claim, and a copy materialized after
    /// the catalog took its directory snapshot is not forgotten.
    pub fn publish(&self, records: impl IntoIterator<Item = (BlockKey, BlockRecord)>) {
        for (key, incoming) in records {
            let _ = self.records.entry(key).and_compute_with(|entry| {
                let current = entry.map(|e| e.into_value().state);
                let state = match (current, &incoming.state) {
                    (Some(BlockState::Claimed), _) => BlockState::Claimed,
                    (Some(BlockState::Materialized(path)), BlockState::Located) => {
                        BlockState::Materialized(path)
                    }
                    (_, state) => state.clone(),
                };
                Op::Put(incoming.with_state(state))
            });
        }
    }

    /// Wait list for changes to `key`. Signalled when a claim is completed or released.
    pub fn watch(&self, key: &BlockKey) -> Arc<Notify> {
        self.watchers
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn wake(&self, key: &BlockKey) {
        let notify = self.watchers.lock().remove(key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// Drops wait lists that no waiter holds anymore.
    pub fn prune_watchers(&self) {
        self.watchers
            .lock()
            .retain(|_, notify| Arc::strong_count(notify) > 1);
    }

    pub fn entry_count(&self) -> u64 {
        self.records.run_pending_tasks();
        self.records.entry_count()
    }
}
