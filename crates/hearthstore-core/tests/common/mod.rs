//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use hearthstore_core::{Config, DurableStore, MemoryVolume, ResourceId, ResourceTree, SerializeError, TimedPersistence};

/// In-memory resource tree: id -> payload.
///
/// Counts concurrent `serialize` calls so tests can check flush cycles
/// never overlap.
#[derive(Default)]
pub struct TestTree {
    values: Mutex<HashMap<ResourceId, Vec<u8>>>,
    broken: Mutex<HashSet<ResourceId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    serialize_calls: AtomicUsize,
    serialize_delay: Mutex<Option<Duration>>,
}

impl TestTree {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, id: ResourceId, value: impl AsRef<[u8]>) {
        self.values.lock().insert(id, value.as_ref().to_vec());
    }

    pub fn delete(&self, id: ResourceId) {
        self.values.lock().remove(&id);
    }

    pub fn value(&self, id: ResourceId) -> Option<Vec<u8>> {
        self.values.lock().get(&id).cloned()
    }

    pub fn break_resource(&self, id: ResourceId) {
        self.broken.lock().insert(id);
    }

    pub fn slow_down(&self, delay: Duration) {
        *self.serialize_delay.lock() = Some(delay);
    }

    /// Number of `serialize` calls started so far.
    pub fn serialize_calls(&self) -> usize {
        self.serialize_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `serialize` calls seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ResourceTree for TestTree {
    fn serialize(&self, id: ResourceId) -> Result<Option<Vec<u8>>, SerializeError> {
        self.serialize_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.serialize_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let result = if self.broken.lock().contains(&id) {
            Err(SerializeError::new(format!("resource {} has no encoder", id)))
        } else {
            Ok(self.values.lock().get(&id).cloned())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn live_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.values.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Persistence over a fresh memory volume. The volume handle shares state
/// with the store inside.
pub fn memory_persistence(config: &Config) -> (TimedPersistence, Arc<TestTree>, MemoryVolume) {
    let volume = MemoryVolume::new();
    let tree = TestTree::new();
    let store = DurableStore::open(Box::new(volume.clone()), config).unwrap();
    let persistence = TimedPersistence::new(store, tree.clone(), config);
    (persistence, tree, volume)
}

/// Reopen a store over `volume`, as after a restart.
pub fn reopen(volume: &MemoryVolume, config: &Config) -> DurableStore {
    DurableStore::open(Box::new(volume.clone()), config).unwrap()
}
