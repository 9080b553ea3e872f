//! Asynchronous size-bounded volume cache
//!
//! Loading a whole volume is expensive, so the cache deduplicates
//! concurrent requests for the same key into one loader invocation and
//! keeps resolved volumes until a byte budget forces out the least
//! recently used ones. The loader itself is an injected collaborator;
//! the cache performs no I/O of its own.

use crate::error::{Result, VolumeError};
use crate::utils::format_bytes;
use crate::volume::VoxelVolume;
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Produces a volume for a cache key. Implemented by the external volume
/// source (e.g. a DICOM reading collaborator).
#[async_trait]
pub trait VolumeLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<VoxelVolume>;
}

/// Byte accounting function for cached volumes.
pub type SizeFn = Box<dyn Fn(&VoxelVolume) -> usize + Send + Sync>;

/// Cache configuration.
#[derive(Debug, Clone, Copy)]
pub struct VolumeCacheConfig {
    /// Total byte budget for resolved entries.
    pub max_bytes: usize,
}

type SharedLoad = Shared<BoxFuture<'static, std::result::Result<Arc<VoxelVolume>, VolumeError>>>;

/// Per-key state: `absent` is simply a missing map entry.
enum Entry {
    Loading(SharedLoad),
    Resolved {
        volume: Arc<VoxelVolume>,
        bytes: usize,
        last_access: u64,
    },
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    total_bytes: usize,
    // monotonic recency counter; strictly increasing per touch
    tick: u64,
}

/// Size-budgeted, deduplicating, LRU volume cache.
///
/// Consumers receive `Arc<VoxelVolume>` references; evicting an entry
/// drops only the cache's own reference, so an outstanding consumer is
/// never invalidated.
pub struct VolumeCache {
    loader: Arc<dyn VolumeLoader>,
    size_fn: SizeFn,
    max_bytes: usize,
    state: Mutex<CacheState>,
}

impl VolumeCache {
    pub fn new(loader: Arc<dyn VolumeLoader>, size_fn: SizeFn, config: VolumeCacheConfig) -> Self {
        Self {
            loader,
            size_fn,
            max_bytes: config.max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the volume for `key`, loading it on demand.
    ///
    /// Concurrent calls for the same key share one loader invocation and
    /// resolve to the same volume instance. A loader failure is delivered
    /// to every waiter, and the key reverts to absent so a later call
    /// retries instead of caching the failure.
    pub async fn get(&self, key: &str) -> Result<Arc<VoxelVolume>> {
        let pending = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.tick += 1;
            let tick = state.tick;
            match state.entries.get_mut(key) {
                Some(Entry::Resolved {
                    volume,
                    last_access,
                    ..
                }) => {
                    *last_access = tick;
                    return Ok(Arc::clone(volume));
                }
                Some(Entry::Loading(shared)) => shared.clone(),
                None => {
                    debug!(key, "starting volume load");
                    let loader = Arc::clone(&self.loader);
                    let owned_key = key.to_string();
                    let shared: SharedLoad =
                        async move { loader.load(&owned_key).await.map(Arc::new) }
                            .boxed()
                            .shared();
                    state
                        .entries
                        .insert(key.to_string(), Entry::Loading(shared.clone()));
                    shared
                }
            }
        };

        // awaited outside the lock: other keys load concurrently
        match pending.await {
            Ok(volume) => {
                self.finish_load(key, &volume);
                Ok(volume)
            }
            Err(err) => {
                let mut guard = self.state.lock();
                if matches!(guard.entries.get(key), Some(Entry::Loading(_))) {
                    guard.entries.remove(key);
                    warn!(key, error = %err, "volume load failed");
                }
                Err(err)
            }
        }
    }

    /// Transitions a completed load to resolved and enforces the budget.
    /// Every waiter of a shared load passes through here; only the first
    /// finds the entry still in the loading state.
    fn finish_load(&self, key: &str, volume: &Arc<VoxelVolume>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;

        match state.entries.get_mut(key) {
            Some(entry @ Entry::Loading(_)) => {
                let bytes = (self.size_fn)(volume);
                *entry = Entry::Resolved {
                    volume: Arc::clone(volume),
                    bytes,
                    last_access: tick,
                };
                state.total_bytes += bytes;
                debug!(key, bytes = %format_bytes(bytes), "volume load resolved");
            }
            Some(Entry::Resolved { last_access, .. }) => {
                *last_access = tick;
                return;
            }
            // disposed while loading; the result is discarded
            None => return,
        }
        self.evict_to_budget(state);
    }

    /// Evicts least-recently-used resolved entries one at a time until
    /// the total fits the budget. In-flight entries are never evicted,
    /// and the last remaining resolved entry is kept even when it alone
    /// exceeds the budget.
    fn evict_to_budget(&self, state: &mut CacheState) {
        while state.total_bytes > self.max_bytes {
            let victim = {
                let mut resolved = 0usize;
                let mut oldest: Option<(u64, &str)> = None;
                for (key, entry) in &state.entries {
                    if let Entry::Resolved { last_access, .. } = entry {
                        resolved += 1;
                        if oldest.map_or(true, |(tick, _)| *last_access < tick) {
                            oldest = Some((*last_access, key));
                        }
                    }
                }
                if resolved <= 1 {
                    break;
                }
                oldest.map(|(_, key)| key.to_string())
            };
            let Some(key) = victim else { break };
            if let Some(Entry::Resolved { bytes, .. }) = state.entries.remove(&key) {
                state.total_bytes -= bytes;
                info!(
                    key = %key,
                    freed = %format_bytes(bytes),
                    total = %format_bytes(state.total_bytes),
                    "evicted volume"
                );
            }
        }
    }

    /// Releases every entry. In-flight loads keep running; their results
    /// are discarded on completion.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.total_bytes = 0;
        debug!(entries = dropped, "cache disposed");
    }

    /// Number of entries, counting in-flight loads.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Total byte size of resolved entries.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }
}
