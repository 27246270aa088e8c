//! Fixed-depth per-region history that feeds the forecaster.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Region, RegionSnapshot};
use crate::error::Result;
use crate::repo::atomic::{read_json, write_json_atomic};

/// Snapshots per region required by the model input window
pub const CACHE_DEPTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at: DateTime<FixedOffset>,
    pub last_update: Option<DateTime<FixedOffset>>,
    pub total_updates: u64,
}

/// Serialized form of the cache: one old-to-new queue per region plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    regions: BTreeMap<Region, VecDeque<RegionSnapshot>>,
    metadata: CacheMetadata,
}

impl CacheState {
    pub fn empty(created_at: DateTime<FixedOffset>) -> Self {
        Self {
            regions: Region::ALL.iter().map(|r| (*r, VecDeque::new())).collect(),
            metadata: CacheMetadata {
                created_at,
                last_update: None,
                total_updates: 0,
            },
        }
    }

    pub fn metadata(&self) -> &CacheMetadata {
        &self.metadata
    }

    /// Drops any queue entries beyond the depth limit, oldest first.
    /// A state written by a different build may not respect the limit.
    fn normalize(&mut self) {
        for region in Region::ALL {
            let queue = self.regions.entry(region).or_default();
            while queue.len() > CACHE_DEPTH {
                queue.pop_front();
            }
        }
    }
}

/// Durable backing for the rolling cache
#[cfg_attr(test, mockall::automock)]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet
    fn load(&self) -> Result<Option<CacheState>>;
    fn save(&self, state: &CacheState) -> Result<()>;
}

/// JSON file written with atomic replace
#[derive(Debug, Clone)]
pub struct JsonCacheStore {
    path: PathBuf,
}

impl JsonCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CacheStore for JsonCacheStore {
    fn load(&self) -> Result<Option<CacheState>> {
        read_json(&self.path)
    }

    fn save(&self, state: &CacheState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionCacheStatus {
    pub count: usize,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub ready: bool,
    pub regions: BTreeMap<Region, RegionCacheStatus>,
    pub metadata: CacheMetadata,
}

impl CacheStatus {
    /// Depth reported in the "Building cache: n/6" reason; North is the reference region
    pub fn reference_count(&self) -> usize {
        self.regions.get(&Region::North).map(|s| s.count).unwrap_or(0)
    }
}

pub struct RollingCache {
    store: Box<dyn CacheStore>,
    state: CacheState,
}

impl RollingCache {
    /// Loads the persisted state. A missing or unreadable state starts an
    /// empty cache; this is never fatal.
    pub fn open(store: Box<dyn CacheStore>, now: DateTime<FixedOffset>) -> Self {
        let state = match store.load() {
            Ok(Some(mut state)) => {
                state.normalize();
                info!(
                    total_updates = state.metadata.total_updates,
                    "loaded rolling cache"
                );
                state
            }
            Ok(None) => {
                info!("no persisted cache found, starting empty");
                CacheState::empty(now)
            }
            Err(e) => {
                warn!(error = %e, "failed to load persisted cache, starting empty");
                CacheState::empty(now)
            }
        };
        Self { store, state }
    }

    /// Pushes one snapshot to the tail of its region's queue and persists.
    pub fn append(&mut self, snapshot: RegionSnapshot) -> Result<()> {
        self.push(snapshot);
        self.store.save(&self.state)
    }

    /// Appends one snapshot per region for a cycle, updates the metadata
    /// and persists once.
    pub fn append_cycle(
        &mut self,
        snapshots: impl IntoIterator<Item = RegionSnapshot>,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        self.state.metadata.last_update = Some(now);
        self.state.metadata.total_updates += 1;
        for snapshot in snapshots {
            self.push(snapshot);
        }
        self.store.save(&self.state)
    }

    fn push(&mut self, snapshot: RegionSnapshot) {
        let region = snapshot.region();
        let queue = self.state.regions.entry(region).or_default();
        queue.push_back(snapshot);
        if queue.len() > CACHE_DEPTH {
            queue.pop_front();
        }
        debug!(region = %region, cache_depth = queue.len(), "appended snapshot");
    }

    pub fn is_ready(&self) -> bool {
        Region::ALL.iter().all(|r| self.depth(*r) == CACHE_DEPTH)
    }

    /// Queue contents old to new, or `None` if the region was never populated
    pub fn get(&self, region: Region) -> Option<&VecDeque<RegionSnapshot>> {
        self.state.regions.get(&region).filter(|q| !q.is_empty())
    }

    pub fn latest(&self, region: Region) -> Option<&RegionSnapshot> {
        self.get(region).and_then(|q| q.back())
    }

    pub fn depth(&self, region: Region) -> usize {
        self.state.regions.get(&region).map_or(0, |q| q.len())
    }

    /// Most recent slot timestamp across all regions
    pub fn last_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        Region::ALL
            .iter()
            .filter_map(|r| self.latest(*r))
            .map(|s| s.timestamp())
            .max()
    }

    pub fn metadata(&self) -> &CacheMetadata {
        &self.state.metadata
    }

    pub fn status(&self) -> CacheStatus {
        let regions = Region::ALL
            .iter()
            .map(|r| {
                let count = self.depth(*r);
                (
                    *r,
                    RegionCacheStatus {
                        count,
                        ready: count == CACHE_DEPTH,
                    },
                )
            })
            .collect();
        CacheStatus {
            ready: self.is_ready(),
            regions,
            metadata: self.state.metadata.clone(),
        }
    }

    pub fn clear(&mut self, now: DateTime<FixedOffset>) -> Result<()> {
        for queue in self.state.regions.values_mut() {
            queue.clear();
        }
        self.state.metadata.last_update = Some(now);
        info!("rolling cache cleared");
        self.store.save(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time::slot_sequence;
    use crate::domain::{GenerationMix, FUEL_COUNT};
    use crate::error::PipelineError;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
            .unwrap()
    }

    fn snapshot(region: Region, ts: DateTime<FixedOffset>, coal: f64) -> RegionSnapshot {
        let mut mw = [0.0; FUEL_COUNT];
        mw[1] = coal;
        RegionSnapshot::new(region, ts, GenerationMix::new(mw, 0.0).unwrap(), None).unwrap()
    }

    fn memory_store() -> MockCacheStore {
        let mut store = MockCacheStore::new();
        store.expect_load().returning(|| Ok(None));
        store.expect_save().returning(|_| Ok(()));
        store
    }

    #[test]
    fn test_ready_only_when_all_regions_full() {
        let mut cache = RollingCache::open(Box::new(memory_store()), t0());
        let slots = slot_sequence(t0(), CACHE_DEPTH);

        for (i, ts) in slots.iter().enumerate() {
            let batch: Vec<_> = Region::ALL
                .iter()
                .filter(|r| i < CACHE_DEPTH - 1 || **r != Region::Other)
                .map(|r| snapshot(*r, *ts, 1.0))
                .collect();
            cache.append_cycle(batch, *ts).unwrap();
        }
        assert!(!cache.is_ready());
        assert_eq!(cache.depth(Region::Other), CACHE_DEPTH - 1);

        cache
            .append(snapshot(Region::Other, slots[5], 1.0))
            .unwrap();
        assert!(cache.is_ready());
        assert_eq!(cache.metadata().total_updates, CACHE_DEPTH as u64);
    }

    #[test]
    fn test_get_absent_for_unpopulated_region() {
        let cache = RollingCache::open(Box::new(memory_store()), t0());
        assert!(cache.get(Region::East).is_none());
        assert!(cache.last_timestamp().is_none());
        assert_eq!(cache.status().reference_count(), 0);
    }

    #[test]
    fn test_load_failure_starts_empty() {
        let mut store = MockCacheStore::new();
        store
            .expect_load()
            .returning(|| Err(PipelineError::Serialization("truncated".into())));
        store.expect_save().times(1).returning(|_| Ok(()));

        let mut cache = RollingCache::open(Box::new(store), t0());
        assert_eq!(cache.depth(Region::North), 0);
        cache.append(snapshot(Region::North, t0(), 3.0)).unwrap();
        assert_eq!(cache.depth(Region::North), 1);
    }

    #[test]
    fn test_persisted_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = RollingCache::open(Box::new(JsonCacheStore::new(&path)), t0());
        for ts in slot_sequence(t0(), 3) {
            cache
                .append_cycle(Region::ALL.iter().map(|r| snapshot(*r, ts, 2.0)), ts)
                .unwrap();
        }

        let reopened = RollingCache::open(Box::new(JsonCacheStore::new(&path)), t0());
        assert_eq!(reopened.status(), cache.status());
        assert_eq!(
            reopened.last_timestamp(),
            Some(t0() + chrono::Duration::minutes(20))
        );
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();

        let cache = RollingCache::open(Box::new(JsonCacheStore::new(&path)), t0());
        assert!(!cache.is_ready());
        assert_eq!(cache.metadata().total_updates, 0);
    }

    #[test]
    fn test_clear_empties_queues() {
        let mut cache = RollingCache::open(Box::new(memory_store()), t0());
        cache
            .append_cycle(Region::ALL.iter().map(|r| snapshot(*r, t0(), 1.0)), t0())
            .unwrap();
        cache.clear(t0()).unwrap();
        assert!(Region::ALL.iter().all(|r| cache.get(*r).is_none()));
        assert_eq!(cache.metadata().total_updates, 1);
    }

    proptest! {
        #[test]
        fn prop_queue_keeps_last_six_in_order(values in prop::collection::vec(0.0f64..5000.0, 1..40)) {
            let mut cache = RollingCache::open(Box::new(memory_store()), t0());
            let slots = slot_sequence(t0(), values.len());
            for (ts, v) in slots.iter().zip(&values) {
                cache.append(snapshot(Region::South, *ts, *v)).unwrap();
            }

            let queue = cache.get(Region::South).unwrap();
            let expected: Vec<f64> = values.iter().rev().take(CACHE_DEPTH).rev().copied().collect();
            let actual: Vec<f64> = queue.iter().map(|s| s.generation().as_array()[1]).collect();
            prop_assert!(queue.len() <= CACHE_DEPTH);
            prop_assert_eq!(actual, expected);
            prop_assert!(queue.iter().zip(queue.iter().skip(1)).all(|(a, b)| a.timestamp() < b.timestamp()));
            prop_assert!(!cache.is_ready());
        }
    }
}
