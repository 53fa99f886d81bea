use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Keep, LocalRecord, RemoteRecord};
use crate::types::Uid;
use crate::RoadError;

#[derive(Default)]
struct Stored {
    local: Option<LocalRecord>,
    remotes: BTreeMap<Uid, RemoteRecord>,
}

/// In-process keep. Clones share storage, so a stack rebuilt from a clone
/// sees everything the previous one wrote.
#[derive(Clone, Default)]
pub struct MemoryKeep {
    stored: Arc<Mutex<Stored>>,
}

impl MemoryKeep {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Stored> {
        self.stored.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Keep for MemoryKeep {
    fn load_local(&self) -> Result<Option<LocalRecord>, RoadError> {
        Ok(self.lock().local.clone())
    }

    fn save_local(&mut self, record: &LocalRecord) -> Result<(), RoadError> {
        self.lock().local = Some(record.clone());
        Ok(())
    }

    fn load_remotes(&self) -> Result<Vec<RemoteRecord>, RoadError> {
        Ok(self.lock().remotes.values().cloned().collect())
    }

    fn save_remote(&mut self, record: &RemoteRecord) -> Result<(), RoadError> {
        self.lock().remotes.insert(record.uid, record.clone());
        Ok(())
    }

    fn delete_remote(&mut self, uid: Uid) -> Result<(), RoadError> {
        self.lock().remotes.remove(&uid);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), RoadError> {
        let mut stored = self.lock();
        stored.local = None;
        stored.remotes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keep::fixtures;

    #[test]
    fn memory_keep_contract() {
        fixtures::exercise(&mut MemoryKeep::new());
    }

    #[test]
    fn clones_share_storage() {
        let mut keep = MemoryKeep::new();
        let other = keep.clone();
        keep.save_remote(&fixtures::remote(5, "epsilon")).unwrap();
        assert_eq!(other.load_remotes().unwrap().len(), 1);
    }
}
