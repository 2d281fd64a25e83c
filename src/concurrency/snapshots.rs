//! Snapshot registration. Every query registers against the current index
//! snapshot on entry and releases on exit; index mutation publishes a new
//! snapshot and then blocks until registrations against older snapshots
//! drain. Queries therefore always see a stable segment set, and teardown
//! is two-phase: request, then wait for the last old reader.

use crate::core::error::{Error, ErrorKind, Result};
use parking_lot::{Condvar, Mutex};
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable view of the index composition at one point in time.
#[derive(Debug)]
pub struct Snapshot {
    pub id: u64,
    /// Identifiers of the on-disk sub-indices visible in this snapshot.
    pub sub_index_ids: Vec<u64>,
    /// Documents deleted since the last merge; queries skip them.
    pub deleted_docs: Arc<RoaringTreemap>,
}

#[derive(Debug)]
struct RegistryState {
    current: Arc<Snapshot>,
    /// snapshot id -> number of registered users.
    active: HashMap<u64, usize>,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct SnapshotRegistry {
    state: Mutex<RegistryState>,
    drained: Condvar,
}

/// Releases its registration on drop.
#[derive(Debug)]
pub struct SnapshotGuard<'a> {
    registry: &'a SnapshotRegistry,
    snapshot: Arc<Snapshot>,
}

impl SnapshotGuard<'_> {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.registry.state.lock();
        if let Some(count) = state.active.get_mut(&self.snapshot.id) {
            *count -= 1;
            if *count == 0 {
                state.active.remove(&self.snapshot.id);
                self.registry.drained.notify_all();
            }
        }
    }
}

impl SnapshotRegistry {
    pub fn new() -> SnapshotRegistry {
        SnapshotRegistry {
            state: Mutex::new(RegistryState {
                current: Arc::new(Snapshot {
                    id: 0,
                    sub_index_ids: Vec::new(),
                    deleted_docs: Arc::new(RoaringTreemap::new()),
                }),
                active: HashMap::new(),
                shutting_down: false,
            }),
            drained: Condvar::new(),
        }
    }

    /// Register with the current snapshot. Refused while draining for
    /// shutdown; in-flight registrations are unaffected.
    pub fn register(&self) -> Result<SnapshotGuard<'_>> {
        let mut state = self.state.lock();
        if state.shutting_down {
            return Err(Error::new(
                ErrorKind::ShuttingDown,
                "engine is draining; no new registrations".to_string(),
            ));
        }
        let snapshot = Arc::clone(&state.current);
        *state.active.entry(snapshot.id).or_insert(0) += 1;
        Ok(SnapshotGuard { registry: self, snapshot })
    }

    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.lock().current)
    }

    /// Publish a new snapshot; returns the id of the one it replaces.
    pub fn publish(&self, sub_index_ids: Vec<u64>) -> u64 {
        self.publish_with_deletes(sub_index_ids, Arc::new(RoaringTreemap::new()))
    }

    pub fn publish_with_deletes(
        &self,
        sub_index_ids: Vec<u64>,
        deleted_docs: Arc<RoaringTreemap>,
    ) -> u64 {
        let mut state = self.state.lock();
        let replaced = state.current.id;
        state.current = Arc::new(Snapshot {
            id: replaced + 1,
            sub_index_ids,
            deleted_docs,
        });
        replaced
    }

    /// Block until no registration against a snapshot with id <= `up_to`
    /// remains.
    pub fn wait_for_drain(&self, up_to: u64) {
        let mut state = self.state.lock();
        while state.active.keys().any(|&id| id <= up_to) {
            self.drained.wait(&mut state);
        }
    }

    /// Two-phase teardown: refuse new registrations, then wait for every
    /// registered user to release.
    pub fn shutdown(&self) {
        let request_id = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.current.id
        };
        self.wait_for_drain(request_id);
    }
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        SnapshotRegistry::new()
    }
}
