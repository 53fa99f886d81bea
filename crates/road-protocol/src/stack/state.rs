use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::crypto::CryptoService;
use crate::estate::{LocalEstate, RemoteEstate};
use crate::keep::RemoteRecord;
use crate::packet::{Body, Header, Packet};
use crate::transaction::{Effect, Registry};
use crate::types::{HostAddr, Kind, NackReason, Uid};
use crate::RoadError;

use super::{StackConfig, StackStats};

/// Complete protocol state: pure logic, no transport, no keep.
///
/// Every `handle_*` / `tick` / `start` path returns `Effect`s that the
/// owning [`RoadStack`](super::RoadStack) executes.
pub(crate) struct StackState {
    pub(crate) local: LocalEstate,
    pub(crate) remotes: BTreeMap<Uid, RemoteEstate>,
    names: HashMap<String, Uid>,
    addrs: HashMap<HostAddr, Uid>,
    pub(crate) registry: Registry,
    pub(crate) config: StackConfig,
    pub(crate) crypto: Arc<dyn CryptoService>,
    next_uid: Uid,
    pub(crate) stats: StackStats,
}

impl StackState {
    pub fn new(local: LocalEstate, config: StackConfig, crypto: Arc<dyn CryptoService>) -> Self {
        Self {
            local,
            remotes: BTreeMap::new(),
            names: HashMap::new(),
            addrs: HashMap::new(),
            registry: Registry::new(),
            config,
            crypto,
            next_uid: 1,
            stats: StackStats::default(),
        }
    }

    /// Load-time transform: rebuild remotes from keep records with fresh
    /// session state. Allocation continues after the highest restored uid.
    pub fn restore(&mut self, records: Vec<RemoteRecord>, now: u64) {
        let period = self.config.presence.period;
        let offset = self.config.presence.offset;
        for record in records {
            if record.uid == 0 {
                tracing::warn!("keep: skipping remote {:?} with uid 0", record.name);
                continue;
            }
            let Some(after) = record.uid.checked_add(1) else {
                tracing::warn!("keep: skipping remote {:?} with uid {}", record.name, record.uid);
                continue;
            };
            let remote = RemoteEstate::restore(record, period, offset, now);
            self.next_uid = self.next_uid.max(after);
            self.insert_remote(remote);
        }
    }

    // ── Remote table ──────────────────────────────────────────────────

    /// Next free uid. The top of the range stays unused as the sentinel.
    pub fn allocate_uid(&mut self) -> Result<Uid, RoadError> {
        let uid = self.next_uid;
        self.next_uid = uid.checked_add(1).ok_or(RoadError::UidsExhausted)?;
        Ok(uid)
    }

    /// Create a vacuous remote with the stack's presence schedule.
    pub fn create_remote(
        &mut self,
        name: String,
        host_addr: HostAddr,
        now: u64,
    ) -> Result<Uid, RoadError> {
        let uid = self.allocate_uid()?;
        let remote = RemoteEstate::new(
            uid,
            name,
            host_addr,
            self.config.presence.period,
            self.config.presence.offset,
            now,
        );
        self.insert_remote(remote);
        Ok(uid)
    }

    pub fn insert_remote(&mut self, remote: RemoteEstate) {
        self.names.insert(remote.name.clone(), remote.uid);
        self.addrs.insert(remote.host_addr, remote.uid);
        self.remotes.insert(remote.uid, remote);
    }

    pub fn remove_remote(&mut self, uid: Uid) -> Option<RemoteEstate> {
        let remote = self.remotes.remove(&uid)?;
        self.registry.remove_remote(uid);
        if self.names.get(&remote.name) == Some(&uid) {
            self.names.remove(&remote.name);
        }
        if self.addrs.get(&remote.host_addr) == Some(&uid) {
            self.addrs.remove(&remote.host_addr);
        }
        Some(remote)
    }

    pub fn uid_by_name(&self, name: &str) -> Option<Uid> {
        self.names.get(name).copied()
    }

    pub fn uid_by_addr(&self, addr: &HostAddr) -> Option<Uid> {
        self.addrs.get(addr).copied()
    }

    /// Update a remote's name and address, keeping the indexes in step.
    pub fn relabel(&mut self, uid: Uid, name: &str, host_addr: HostAddr) {
        let Some(remote) = self.remotes.get_mut(&uid) else {
            return;
        };
        if remote.name != name {
            if self.names.get(&remote.name) == Some(&uid) {
                self.names.remove(&remote.name);
            }
            if let Some(other) = self.names.insert(name.to_string(), uid) {
                if other != uid {
                    tracing::warn!("remote {uid} takes name {name:?} from remote {other}");
                }
            }
            remote.name = name.to_string();
        }
        if remote.host_addr != host_addr {
            if self.addrs.get(&remote.host_addr) == Some(&uid) {
                self.addrs.remove(&remote.host_addr);
            }
            self.addrs.insert(host_addr, uid);
            remote.host_addr = host_addr;
        }
    }

    // ── Packet helpers ────────────────────────────────────────────────

    /// Sign a packet with the local identity.
    pub fn sign(&self, header: Header, body: Body) -> Result<Packet, RoadError> {
        Packet::signed(header, body, self.local.signer.seed(), self.crypto.as_ref())
    }

    /// Header for a packet to `uid`: our near uid, their far uid.
    pub fn header_for(&self, uid: Uid) -> Result<Header, RoadError> {
        let remote = self.remotes.get(&uid).ok_or(RoadError::UnknownRemote(uid))?;
        Ok(Header {
            source: remote.uid,
            dest: remote.far_uid,
        })
    }

    /// Queue a signed refusal answering a packet whose header was `inbound`.
    pub fn nack(
        &self,
        to: HostAddr,
        inbound: Header,
        near: Option<Uid>,
        kind: Kind,
        reason: NackReason,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let header = Header {
            source: near.unwrap_or(0),
            dest: inbound.source,
        };
        let packet = self.sign(header, Body::Nack { kind, reason })?;
        tracing::debug!("{kind}: nack {reason} to {to}");
        fx.push(Effect::Send { to, packet });
        Ok(())
    }

    /// Collect target uids: one remote, or all of them.
    pub fn targets(&self, target: Option<Uid>) -> Result<Vec<Uid>, RoadError> {
        match target {
            Some(uid) if self.remotes.contains_key(&uid) => Ok(vec![uid]),
            Some(uid) => Err(RoadError::UnknownRemote(uid)),
            None => Ok(self.remotes.keys().copied().collect()),
        }
    }

    /// Start `goal` for every target. Returns the number of new transactions.
    pub fn initiate(&mut self, targets: &[Uid], goal: Kind, now: u64) -> (usize, Vec<Effect>) {
        let mut fx = Vec::new();
        let started = targets
            .iter()
            .filter(|&&uid| self.start(uid, goal, false, now, &mut fx))
            .count();
        (started, fx)
    }
}
