//! Process-wide dataset cache with a time-to-live policy.
//!
//! States:
//! - **Empty**: nothing built yet; the first `get` builds synchronously and
//!   every concurrent caller waits for that one build.
//! - **Fresh**: age < TTL; `get` returns the cached dataset.
//! - **Stale**: age >= TTL; `get` returns the stale dataset immediately and
//!   starts a background rebuild.
//! - **Building**: a rebuild is in flight. Callers with a dataset to fall back
//!   on never wait for it; callers without one block until it finishes.
//! - **Unavailable**: no dataset and the last rebuild failed. The error is
//!   returned to the caller; the next `get` retries.
//!
//! At most one rebuild runs at a time. The `in_flight` flag is guarded by a
//! single mutex; the published dataset sits behind an `ArcSwapOption` so
//! readers never take that lock. A failed rebuild never replaces a good
//! dataset.

pub mod clock;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::ingest::{Dataset, DatasetSource, ScanError, Timestamp};

pub use clock::{Clock, ManualClock, SystemClock};
pub use snapshot::{load_snapshot, save_snapshot, SnapshotError};

/// Observable cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheState {
    Empty,
    Building,
    Fresh,
    Stale,
    Unavailable,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CacheState::Empty => "empty",
            CacheState::Building => "building",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Unavailable => "unavailable",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// A dataset handed out by the cache, with how old it was at hand-out time
#[derive(Debug, Clone)]
pub struct CachedDataset {
    pub dataset: Arc<Dataset>,
    pub freshness: Freshness,
    pub age: Duration,
}

impl CachedDataset {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No dataset has ever been built and the rebuild failed
    #[error("No data available: {0}")]
    Unavailable(#[source] ScanError),

    /// A forced refresh failed; the previous dataset is still being served
    #[error("Refresh failed, serving previous dataset: {0}")]
    RefreshFailed(#[source] ScanError),
}

/// Construction options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    /// Persist every good dataset here and seed from it on startup
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(crate::config::DEFAULT_REFRESH_INTERVAL_SECONDS),
            snapshot_path: None,
        }
    }
}

/// Data-health indicators for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub state: CacheState,
    pub source: String,
    pub ttl_secs: u64,
    pub built_at: Option<Timestamp>,
    pub age_secs: Option<u64>,
    pub source_file_count: usize,
    pub failure_count: usize,
    pub duplicate_count: usize,
    pub record_count: usize,
    pub rebuild_count: u64,
    pub failed_rebuild_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct RebuildState {
    in_flight: bool,
    /// Completed rebuild attempts, successful or not
    generation: u64,
    rebuild_count: u64,
    failed_rebuild_count: u64,
    last_error: Option<ScanError>,
}

struct Shared {
    source: Arc<dyn DatasetSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    snapshot_path: Option<PathBuf>,
    current: ArcSwapOption<Dataset>,
    state: Mutex<RebuildState>,
    rebuilt: Condvar,
}

/// Releases `in_flight` if a rebuild unwinds before publishing its outcome
struct RebuildGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.state.lock();
        state.in_flight = false;
        state.generation += 1;
        state.failed_rebuild_count += 1;
        drop(state);

        log::error!("Dataset rebuild from {} panicked", self.shared.source.describe());
        self.shared.rebuilt.notify_all();
    }
}

impl Shared {
    /// Run one rebuild. The caller must have set `in_flight`.
    fn rebuild(&self) -> Result<Arc<Dataset>, ScanError> {
        let mut guard = RebuildGuard {
            shared: self,
            armed: true,
        };
        let started = self.clock.now();
        log::info!("Rebuilding dataset from {}", self.source.describe());

        let result = self.source.build(started).map(Arc::new);

        if let (Ok(dataset), Some(path)) = (&result, &self.snapshot_path) {
            if let Err(e) = save_snapshot(path, dataset) {
                log::warn!("Failed to write dataset snapshot {}: {}", path.display(), e);
            }
        }

        guard.armed = false;
        let mut state = self.state.lock();
        match &result {
            Ok(dataset) => {
                self.current.store(Some(Arc::clone(dataset)));
                state.rebuild_count += 1;
                state.last_error = None;
            }
            Err(err) => {
                state.failed_rebuild_count += 1;
                state.last_error = Some(err.clone());
                match self.current.load_full() {
                    Some(previous) => log::warn!(
                        "Rebuild failed, still serving dataset built at {}: {}",
                        previous.built_at(),
                        err
                    ),
                    None => log::error!("Rebuild failed and no dataset is available: {}", err),
                }
            }
        }
        state.in_flight = false;
        state.generation += 1;
        drop(state);

        self.rebuilt.notify_all();
        result
    }
}

/// Shared handle to the dataset cache. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct DatasetCache {
    shared: Arc<Shared>,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn DatasetSource>, options: CacheOptions) -> Self {
        Self::with_clock(source, Arc::new(SystemClock), options)
    }

    pub fn with_clock(
        source: Arc<dyn DatasetSource>,
        clock: Arc<dyn Clock>,
        options: CacheOptions,
    ) -> Self {
        let seed = options.snapshot_path.as_deref().and_then(|path| {
            match load_snapshot(path) {
                Ok(dataset) => {
                    log::info!(
                        "Seeded cache from snapshot {} ({} records, built at {})",
                        path.display(),
                        dataset.len(),
                        dataset.built_at()
                    );
                    Some(Arc::new(dataset))
                }
                Err(SnapshotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    log::warn!("Ignoring unreadable snapshot {}: {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            shared: Arc::new(Shared {
                source,
                clock,
                ttl: options.ttl,
                snapshot_path: options.snapshot_path,
                current: ArcSwapOption::new(seed),
                state: Mutex::new(RebuildState::default()),
                rebuilt: Condvar::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// Current dataset, building it first if none exists yet
    pub fn get_current_dataset(&self) -> Result<Arc<Dataset>, CacheError> {
        self.get_with_status().map(|cached| cached.dataset)
    }

    /// Like `get_current_dataset`, also reporting whether the dataset is stale
    pub fn get_with_status(&self) -> Result<CachedDataset, CacheError> {
        loop {
            if let Some(dataset) = self.shared.current.load_full() {
                let age = dataset.age(self.shared.clock.now());
                if age < self.shared.ttl {
                    return Ok(CachedDataset {
                        dataset,
                        freshness: Freshness::Fresh,
                        age,
                    });
                }
                self.start_background_rebuild();
                return Ok(CachedDataset {
                    dataset,
                    freshness: Freshness::Stale,
                    age,
                });
            }

            let mut state = self.shared.state.lock();
            if self.shared.current.load().is_some() {
                // Published between the first check and taking the lock
                continue;
            }

            if state.in_flight {
                let generation = state.generation;
                while state.generation == generation {
                    self.shared.rebuilt.wait(&mut state);
                }
                if self.shared.current.load().is_some() {
                    continue;
                }
                if let Some(err) = &state.last_error {
                    return Err(CacheError::Unavailable(err.clone()));
                }
                continue;
            }

            state.in_flight = true;
            drop(state);

            return self
                .shared
                .rebuild()
                .map(|dataset| CachedDataset {
                    dataset,
                    freshness: Freshness::Fresh,
                    age: Duration::ZERO,
                })
                .map_err(CacheError::Unavailable);
        }
    }

    /// Force a synchronous rebuild, joining one already in flight
    pub fn refresh(&self) -> Result<Arc<Dataset>, CacheError> {
        let mut state = self.shared.state.lock();
        if state.in_flight {
            let generation = state.generation;
            while state.generation == generation {
                self.shared.rebuilt.wait(&mut state);
            }
            let last_error = state.last_error.clone();
            match (last_error, self.shared.current.load_full()) {
                (None, Some(dataset)) => return Ok(dataset),
                (Some(err), Some(_)) => return Err(CacheError::RefreshFailed(err)),
                (Some(err), None) => return Err(CacheError::Unavailable(err)),
                (None, None) => {
                    while state.in_flight {
                        self.shared.rebuilt.wait(&mut state);
                    }
                }
            }
        }
        state.in_flight = true;
        drop(state);

        let had_dataset = self.shared.current.load().is_some();
        self.shared.rebuild().map_err(|err| {
            if had_dataset {
                CacheError::RefreshFailed(err)
            } else {
                CacheError::Unavailable(err)
            }
        })
    }

    /// Block until no rebuild is in flight
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.in_flight {
            self.shared.rebuilt.wait(&mut state);
        }
    }

    pub fn state(&self) -> CacheState {
        let state = self.shared.state.lock();
        if state.in_flight {
            return CacheState::Building;
        }
        match self.shared.current.load_full() {
            Some(dataset) if dataset.age(self.shared.clock.now()) < self.shared.ttl => CacheState::Fresh,
            Some(_) => CacheState::Stale,
            None if state.last_error.is_some() => CacheState::Unavailable,
            None => CacheState::Empty,
        }
    }

    /// Dataset currently published, without triggering any rebuild
    pub fn peek(&self) -> Option<Arc<Dataset>> {
        self.shared.current.load_full()
    }

    pub fn health(&self) -> CacheHealth {
        let cache_state = self.state();
        let now = self.shared.clock.now();
        let dataset = self.peek();
        let state = self.shared.state.lock();

        CacheHealth {
            state: cache_state,
            source: self.shared.source.describe(),
            ttl_secs: self.shared.ttl.as_secs(),
            built_at: dataset.as_ref().map(|d| d.built_at()),
            age_secs: dataset.as_ref().map(|d| d.age(now).as_secs()),
            source_file_count: dataset.as_ref().map_or(0, |d| d.source_file_count()),
            failure_count: dataset.as_ref().map_or(0, |d| d.failure_count()),
            duplicate_count: dataset.as_ref().map_or(0, |d| d.duplicate_count()),
            record_count: dataset.as_ref().map_or(0, |d| d.len()),
            rebuild_count: state.rebuild_count,
            failed_rebuild_count: state.failed_rebuild_count,
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    fn start_background_rebuild(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.in_flight {
                return;
            }
            state.in_flight = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("dataset-rebuild".to_string())
            .spawn(move || {
                // outcome is recorded in RebuildState
                let _ = shared.rebuild();
            });

        if let Err(e) = spawned {
            log::warn!("Could not spawn background rebuild ({}), rebuilding inline", e);
            // outcome is recorded in RebuildState
            let _ = self.shared.rebuild();
        }
    }
}
