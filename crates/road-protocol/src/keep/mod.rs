//! Durable storage contract.
//!
//! The keep stores identity and admission state only: the local estate and,
//! per remote, uids, name, address, long-term keys and `joined`. Sessions,
//! `allowed` and `alived` are never written.

mod memory;
mod sqlite;

pub use memory::MemoryKeep;
pub use sqlite::SqliteKeep;

use serde::{Deserialize, Serialize};

use crate::types::{AutoMode, HostAddr, Tristate, Uid};
use crate::RoadError;

/// Persisted local estate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub name: String,
    pub uid: Uid,
    pub host_addr: HostAddr,
    pub signing_seed: [u8; 32],
    pub box_secret: [u8; 32],
    pub main: bool,
    pub auto: AutoMode,
}

/// Persisted subset of a remote estate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub uid: Uid,
    pub far_uid: Uid,
    pub name: String,
    pub host_addr: HostAddr,
    pub verify_key: Option<[u8; 32]>,
    pub public_key: Option<[u8; 32]>,
    pub joined: Tristate,
}

/// Durable store behind a stack.
pub trait Keep: Send {
    fn load_local(&self) -> Result<Option<LocalRecord>, RoadError>;

    fn save_local(&mut self, record: &LocalRecord) -> Result<(), RoadError>;

    fn load_remotes(&self) -> Result<Vec<RemoteRecord>, RoadError>;

    /// Insert or replace the record with the same uid.
    fn save_remote(&mut self, record: &RemoteRecord) -> Result<(), RoadError>;

    fn delete_remote(&mut self, uid: Uid) -> Result<(), RoadError>;

    /// Wipe everything, local estate included.
    fn clear(&mut self) -> Result<(), RoadError>;
}

impl<K: Keep + ?Sized> Keep for Box<K> {
    fn load_local(&self) -> Result<Option<LocalRecord>, RoadError> {
        (**self).load_local()
    }

    fn save_local(&mut self, record: &LocalRecord) -> Result<(), RoadError> {
        (**self).save_local(record)
    }

    fn load_remotes(&self) -> Result<Vec<RemoteRecord>, RoadError> {
        (**self).load_remotes()
    }

    fn save_remote(&mut self, record: &RemoteRecord) -> Result<(), RoadError> {
        (**self).save_remote(record)
    }

    fn delete_remote(&mut self, uid: Uid) -> Result<(), RoadError> {
        (**self).delete_remote(uid)
    }

    fn clear(&mut self) -> Result<(), RoadError> {
        (**self).clear()
    }
}
