//! Snapshot repository: the engine's handle to the "active" snapshot the
//! next pipeline stage consumes. No global registry; the orchestrating layer
//! owns the store and passes it into scan constructors.

use crate::config::ScanSettings;
use crate::memory::ProcessMemory;
use crate::snapshot::{ScanLabel, Snapshot};
use anyhow::Result;
use log::info;
use std::sync::{Arc, RwLock};

pub trait SnapshotRepository<L: ScanLabel>: Send + Sync {
    /// The active snapshot, freshly capturing one when `create_if_none` and
    /// no snapshot exists.
    fn active(&self, create_if_none: bool) -> Result<Option<Snapshot<L>>>;

    /// Replace the active snapshot.
    fn save(&self, snapshot: Snapshot<L>) -> Result<()>;
}

/// In-memory store backed by the process accessor for fresh captures.
pub struct ActiveSnapshotStore<L: ScanLabel> {
    memory: Arc<dyn ProcessMemory>,
    settings: ScanSettings,
    active: RwLock<Option<Snapshot<L>>>,
}

impl<L: ScanLabel> ActiveSnapshotStore<L> {
    pub fn new(memory: Arc<dyn ProcessMemory>, settings: ScanSettings) -> Self {
        Self {
            memory,
            settings,
            active: RwLock::new(None),
        }
    }
}

impl<L: ScanLabel> SnapshotRepository<L> for ActiveSnapshotStore<L> {
    fn active(&self, create_if_none: bool) -> Result<Option<Snapshot<L>>> {
        {
            let guard = self.active.read().expect("snapshot store poisoned");
            if let Some(snapshot) = guard.as_ref() {
                return Ok(Some(snapshot.clone()));
            }
        }

        if !create_if_none {
            return Ok(None);
        }

        let snapshot = Snapshot::capture(
            "captured",
            &*self.memory,
            self.settings.element_width,
            self.settings.alignment,
        )?;
        info!(
            "captured fresh snapshot: {} regions, {} elements",
            snapshot.region_count(),
            snapshot.element_count()
        );

        let mut guard = self.active.write().expect("snapshot store poisoned");
        *guard = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: Snapshot<L>) -> Result<()> {
        let mut guard = self.active.write().expect("snapshot store poisoned");
        *guard = Some(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RegionKind;
    use crate::memory::mock::MockMemory;

    fn store() -> ActiveSnapshotStore<i16> {
        let mem = MockMemory::new();
        mem.add_region(0x1000, 32, RegionKind::Heap, None);
        ActiveSnapshotStore::new(Arc::new(mem), ScanSettings::default())
    }

    #[test]
    fn active_without_create_yields_none() {
        let store = store();
        assert!(store.active(false).unwrap().is_none());
    }

    #[test]
    fn create_if_none_captures_and_caches() {
        let store = store();
        let first = store.active(true).unwrap().unwrap();
        assert_eq!(first.region_count(), 1);

        // Second call returns the cached capture, not a new one.
        let second = store.active(false).unwrap().unwrap();
        assert_eq!(second.region_count(), 1);
    }

    #[test]
    fn save_replaces_the_active_snapshot() {
        let store = store();
        store.save(Snapshot::new("saved", Vec::new())).unwrap();
        let active = store.active(false).unwrap().unwrap();
        assert_eq!(active.name(), "saved");
    }
}
