//! The road stack: owns the remote table and the transaction registry,
//! routes inbound packets, runs timers and the presence manager.
//!
//! All progress happens inside `service_*` calls made by the embedder.
//! Public operations only register transactions and queue packets.

mod config;
mod dispatch;
mod event;
mod presence;
pub(crate) mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{PresencePolicy, StackConfig, TransactionPolicy};
pub use event::{StackEvent, StackStats};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use road_transport::Transport;

use crate::clock::Clock;
use crate::crypto::CryptoService;
use crate::estate::{LocalEstate, RemoteEstate};
use crate::keep::{Keep, LocalRecord};
use crate::packet::Packet;
use crate::transaction::Effect;
use crate::types::{AutoMode, HostAddr, Kind, Tristate, Uid};
use crate::RoadError;

use state::StackState;

/// A remote to add by hand.
#[derive(Debug, Clone)]
pub struct NewRemote {
    pub name: String,
    pub host_addr: HostAddr,
    pub period: Option<Duration>,
    pub offset: Option<Duration>,
}

impl NewRemote {
    pub fn new(name: impl Into<String>, host_addr: HostAddr) -> Self {
        Self {
            name: name.into(),
            host_addr,
            period: None,
            offset: None,
        }
    }

    /// Override the stack's presence schedule for this remote.
    pub fn presence(mut self, period: Duration, offset: Duration) -> Self {
        self.period = Some(period);
        self.offset = Some(offset);
        self
    }
}

/// One node's protocol engine.
///
/// ```rust
/// use std::sync::Arc;
/// use road_protocol::{DalekCrypto, ManualClock, MemoryKeep, RoadStack, StackConfig};
/// use road_transport::MemoryNetwork;
///
/// # fn main() -> Result<(), road_protocol::RoadError> {
/// let network = MemoryNetwork::new();
/// let clock = ManualClock::new(0);
/// let mut stack = RoadStack::open(
///     StackConfig::new("main").main(true),
///     Box::new(network.bind("127.0.0.1:7530".parse().unwrap())?),
///     Box::new(MemoryKeep::new()),
///     Arc::new(DalekCrypto),
///     Arc::new(clock),
/// )?;
/// let events = stack.service_all();
/// assert!(events.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct RoadStack {
    state: StackState,
    transport: Box<dyn Transport>,
    keep: Box<dyn Keep>,
    clock: Arc<dyn Clock>,
    outbox: VecDeque<(HostAddr, Packet)>,
    events: Vec<StackEvent>,
}

impl RoadStack {
    /// Build a stack, restoring the local estate and remotes from `keep`.
    ///
    /// A brand-new keep gets a freshly generated identity from `config`.
    /// Restored remotes keep `joined` but start without sessions.
    pub fn open(
        config: StackConfig,
        transport: Box<dyn Transport>,
        mut keep: Box<dyn Keep>,
        crypto: Arc<dyn CryptoService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RoadError> {
        config.validate()?;
        let host_addr = transport.local_addr();
        let now = clock.now();

        let local = match keep.load_local()? {
            Some(record) => {
                tracing::info!("stack: restoring {:?} from keep", record.name);
                LocalEstate::from_record(record, host_addr)
            }
            None => {
                let signer = crypto.signing_keypair();
                let boxer = crypto.box_keypair();
                let record = LocalRecord {
                    name: config.name.clone(),
                    uid: config.uid,
                    host_addr,
                    signing_seed: *signer.seed(),
                    box_secret: *boxer.secret(),
                    main: config.main,
                    auto: config.auto,
                };
                keep.save_local(&record)?;
                tracing::info!("stack: new identity {:?}", record.name);
                LocalEstate::from_record(record, host_addr)
            }
        };

        let mut state = StackState::new(local, config, crypto);
        state.restore(keep.load_remotes()?, now);
        tracing::info!(
            "stack: {:?} on {host_addr} (main {}, auto {}) with {} remotes",
            state.local.name,
            state.local.main,
            state.local.auto,
            state.remotes.len()
        );

        Ok(Self {
            state,
            transport,
            keep,
            clock,
            outbox: VecDeque::new(),
            events: Vec::new(),
        })
    }

    // ── Remotes ───────────────────────────────────────────────────────

    /// Add a vacuous remote. Names and addresses must be unique.
    pub fn add_remote(&mut self, remote: NewRemote) -> Result<Uid, RoadError> {
        if self.state.uid_by_name(&remote.name).is_some() {
            return Err(RoadError::DuplicateRemote(remote.name));
        }
        if self.state.uid_by_addr(&remote.host_addr).is_some() {
            return Err(RoadError::DuplicateRemote(remote.host_addr.to_string()));
        }
        let now = self.clock.now();
        let uid = self
            .state
            .create_remote(remote.name.clone(), remote.host_addr, now)?;
        if let (Some(period), Some(offset)) = (remote.period, remote.offset) {
            self.update_presence(uid, period, offset, now);
        }
        self.save_remote(uid)?;
        tracing::info!("stack: added remote {:?} ({uid}) at {}", remote.name, remote.host_addr);
        Ok(uid)
    }

    fn update_presence(&mut self, uid: Uid, period: Duration, offset: Duration, now: u64) {
        if let Some(r) = self.state.remotes.get_mut(&uid) {
            r.set_presence(period, offset);
            r.reschedule(now);
        }
    }

    /// Forget a remote: its transactions and session go, and the keep
    /// drops it. Nothing is sent to the peer.
    pub fn remove_remote(&mut self, uid: Uid) -> Result<(), RoadError> {
        let remote = self
            .state
            .remove_remote(uid)
            .ok_or(RoadError::UnknownRemote(uid))?;
        tracing::info!("stack: removed remote {:?} ({uid})", remote.name);
        self.keep.delete_remote(uid)
    }

    /// Mutate a remote (flags, presence schedule) and persist the result.
    pub fn update_remote<F>(&mut self, uid: Uid, f: F) -> Result<(), RoadError>
    where
        F: FnOnce(&mut RemoteEstate),
    {
        let remote = self
            .state
            .remotes
            .get_mut(&uid)
            .ok_or(RoadError::UnknownRemote(uid))?;
        f(remote);
        self.save_remote(uid)
    }

    fn save_remote(&mut self, uid: Uid) -> Result<(), RoadError> {
        match self.state.remotes.get(&uid) {
            Some(remote) => self.keep.save_remote(&remote.to_record()),
            None => Ok(()),
        }
    }

    // ── Transactions ──────────────────────────────────────────────────

    /// Join one remote, or all. With `cascade`, continue through allow and alive.
    pub fn join(&mut self, target: Option<Uid>, cascade: bool) -> Result<usize, RoadError> {
        let goal = if cascade { Kind::Alive } else { Kind::Join };
        self.initiate(target, goal)
    }

    /// Join whatever listens at `addr`, creating a vacuous remote if needed.
    pub fn join_addr(&mut self, addr: HostAddr, cascade: bool) -> Result<Uid, RoadError> {
        let uid = match self.state.uid_by_addr(&addr) {
            Some(uid) => uid,
            None => self.add_remote(NewRemote::new(addr.to_string(), addr))?,
        };
        self.join(Some(uid), cascade)?;
        Ok(uid)
    }

    /// Allow one remote, or all. Joins first where needed.
    pub fn allow(&mut self, target: Option<Uid>, cascade: bool) -> Result<usize, RoadError> {
        let goal = if cascade { Kind::Alive } else { Kind::Allow };
        self.initiate(target, goal)
    }

    /// Probe one remote, or all. Joins and allows first where needed.
    /// Alive is the last stage, so `cascade` changes nothing here.
    pub fn alive(&mut self, target: Option<Uid>, _cascade: bool) -> Result<usize, RoadError> {
        self.initiate(target, Kind::Alive)
    }

    fn initiate(&mut self, target: Option<Uid>, goal: Kind) -> Result<usize, RoadError> {
        let targets = self.state.targets(target)?;
        let (started, effects) = self.state.initiate(&targets, goal, self.clock.now());
        self.apply(effects);
        Ok(started)
    }

    /// Presence pass: probe due remotes. Returns transactions started.
    pub fn manage(&mut self, cascade: bool, immediate: bool) -> usize {
        let (started, effects) = self.state.manage(cascade, immediate, self.clock.now());
        self.apply(effects);
        started
    }

    // ── Service loop ──────────────────────────────────────────────────

    /// Drain and dispatch every queued inbound datagram.
    pub fn service_rx(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.transport.receive() {
                Ok(Some((from, data))) => {
                    let effects = self.state.handle_datagram(from, &data, self.clock.now());
                    self.apply(effects);
                    handled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stack: receive failed: {e}");
                    break;
                }
            }
        }
        handled
    }

    /// Run redo and timeout timers.
    pub fn service_timers(&mut self) {
        let effects = self.state.tick(self.clock.now());
        self.apply(effects);
    }

    /// Send every queued packet.
    pub fn service_tx(&mut self) -> usize {
        let mut sent = 0;
        while let Some((to, packet)) = self.outbox.pop_front() {
            let result = packet
                .to_bytes()
                .and_then(|bytes| self.transport.send(to, &bytes).map_err(Into::into));
            match result {
                Ok(()) => {
                    self.state.stats.packets_out += 1;
                    sent += 1;
                }
                Err(e) => {
                    self.state.stats.packets_dropped += 1;
                    tracing::warn!("stack: {} to {to} not sent: {e}", packet.body.label());
                }
            }
        }
        sent
    }

    /// One full pass: receive, timers, transmit. Returns the events produced
    /// since the previous pass.
    pub fn service_all(&mut self) -> Vec<StackEvent> {
        self.service_rx();
        self.service_timers();
        self.service_tx();
        std::mem::take(&mut self.events)
    }

    /// Discard every transaction, session and queued packet. Joined
    /// relationships stay on record; nothing is sent.
    pub fn close(&mut self) {
        let dropped = self.state.registry.len();
        self.state.registry.clear();
        for remote in self.state.remotes.values_mut() {
            if remote.allowed() != Tristate::Unknown {
                remote.set_allowed(Tristate::Unknown);
            }
        }
        self.outbox.clear();
        tracing::info!("stack: closed {:?}, {dropped} transactions dropped", self.state.local.name);
    }

    // ── Local estate ──────────────────────────────────────────────────

    pub fn set_main(&mut self, main: bool) -> Result<(), RoadError> {
        self.state.local.main = main;
        self.keep.save_local(&self.state.local.to_record())
    }

    pub fn set_auto(&mut self, auto: AutoMode) -> Result<(), RoadError> {
        self.state.local.auto = auto;
        self.keep.save_local(&self.state.local.to_record())
    }

    // ── Read access ───────────────────────────────────────────────────

    pub fn local(&self) -> &LocalEstate {
        &self.state.local
    }

    pub fn local_addr(&self) -> HostAddr {
        self.transport.local_addr()
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemoteEstate> {
        self.state.remotes.values()
    }

    pub fn remote(&self, uid: Uid) -> Option<&RemoteEstate> {
        self.state.remotes.get(&uid)
    }

    pub fn remote_by_name(&self, name: &str) -> Option<&RemoteEstate> {
        self.state
            .uid_by_name(name)
            .and_then(|uid| self.state.remotes.get(&uid))
    }

    /// Number of transactions in flight.
    pub fn transaction_count(&self) -> usize {
        self.state.registry.len()
    }

    pub fn stats(&self) -> StackStats {
        self.state.stats
    }

    // ── Effects ───────────────────────────────────────────────────────

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, packet } => self.outbox.push_back((to, packet)),
                Effect::PersistRemote(uid) => {
                    if let Err(e) = self.save_remote(uid) {
                        tracing::warn!("keep: failed to save remote {uid}: {e}");
                    }
                }
                Effect::PersistLocal => {
                    if let Err(e) = self.keep.save_local(&self.state.local.to_record()) {
                        tracing::warn!("keep: failed to save local estate: {e}");
                    }
                }
                Effect::Emit(event) => self.events.push(event),
            }
        }
    }
}
