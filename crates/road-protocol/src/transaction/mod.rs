//! Join, allow and alive transactions.
//!
//! A transaction is plain data held in the stack's [`Registry`]. The
//! handlers in `join`, `allow` and `alive` are methods on the stack state:
//! they mutate estates and transactions and return [`Effect`]s, never
//! touching the network or the keep themselves.
//!
//! Chaining: every initiator carries a `goal`. `start` opens the first
//! stage the remote still lacks on the way to that goal; when a stage
//! completes below its goal, `start` runs again. Backward prerequisites
//! and forward cascade are the same mechanism, resumable across passes.

mod alive;
mod allow;
mod join;
mod registry;

pub(crate) use registry::Registry;

use crate::crypto::BoxKeypair;
use crate::packet::Packet;
use crate::stack::state::StackState;
use crate::stack::StackEvent;
use crate::types::{HostAddr, Kind, NackReason, Role, Tristate, Uid};

/// Registry key: one transaction per remote, kind and role.
pub(crate) type TxKey = (Uid, Kind, Role);

/// Per-kind protocol state.
#[derive(Clone)]
pub(crate) enum Progress {
    /// Join initiator awaiting accept, or correspondent awaiting ack.
    Join,
    /// Allow initiator awaiting the cookie.
    AllowHello {
        ephemeral: BoxKeypair,
        challenge: [u8; 32],
    },
    /// Allow initiator awaiting the ack.
    AllowInitiated {
        ephemeral: BoxKeypair,
        peer: [u8; 32],
    },
    /// Allow correspondent awaiting the initiate.
    AllowCookie {
        ephemeral: BoxKeypair,
        peer: [u8; 32],
        counter: [u8; 32],
    },
    /// Alive initiator awaiting the ack for `seq`.
    Alive { seq: u64 },
}

/// An in-flight exchange with one remote.
pub(crate) struct Transaction {
    pub kind: Kind,
    pub role: Role,
    pub remote: Uid,
    /// Last stage to reach before the chain stops.
    pub goal: Kind,
    /// Whether this chain already renewed a prerequisite after a nack.
    pub renewed: bool,
    pub redos: u32,
    pub deadline: u64,
    pub redo_at: u64,
    /// Last packet sent, resent on the redo timer.
    pub last: Option<Packet>,
    pub progress: Progress,
}

impl Transaction {
    pub fn key(&self) -> TxKey {
        (self.remote, self.kind, self.role)
    }
}

/// Intention produced by the pure stack logic, executed by the stack.
#[derive(Debug)]
pub(crate) enum Effect {
    Send { to: HostAddr, packet: Packet },
    PersistRemote(Uid),
    PersistLocal,
    Emit(StackEvent),
}

/// First stage still missing on the way to `goal`. An explicit goal below
/// the remote's state re-runs that stage.
fn stage_for(joined: Tristate, allowed: Tristate, goal: Kind) -> Kind {
    if goal == Kind::Join || !joined.is_true() {
        Kind::Join
    } else if goal == Kind::Allow || !allowed.is_true() {
        Kind::Allow
    } else {
        Kind::Alive
    }
}

impl StackState {
    /// Start (or fold into) the next stage towards `goal` for `uid`.
    ///
    /// Returns true only when a new transaction was opened.
    pub(crate) fn start(
        &mut self,
        uid: Uid,
        goal: Kind,
        renewed: bool,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> bool {
        let Some(remote) = self.remotes.get(&uid) else {
            return false;
        };
        let stage = stage_for(remote.joined(), remote.allowed(), goal);

        // At most one per remote and kind: fold duplicates
        if let Some(tx) = self.registry.get_mut(&(uid, stage, Role::Initiator)) {
            tx.goal = tx.goal.max(goal);
            if let Some(packet) = &tx.last {
                fx.push(Effect::Send {
                    to: remote.host_addr,
                    packet: packet.clone(),
                });
            }
            tracing::debug!("{stage}: folded request for {uid} into pending transaction");
            return false;
        }
        if let Some(tx) = self.registry.get_mut(&(uid, stage, Role::Correspondent)) {
            tx.goal = tx.goal.max(goal);
            tracing::debug!("{stage}: {uid} already in progress as correspondent");
            return false;
        }

        let result = match stage {
            Kind::Join => self.join_begin(uid, goal, renewed, now, fx),
            Kind::Allow => self.allow_begin(uid, goal, renewed, now, fx),
            Kind::Alive => self.alive_begin(uid, renewed, now, fx),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{stage}: cannot start with {uid}: {e}");
                false
            }
        }
    }

    /// Register a new transaction and send its first packet.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        &mut self,
        kind: Kind,
        role: Role,
        uid: Uid,
        goal: Kind,
        renewed: bool,
        progress: Progress,
        packet: Packet,
        now: u64,
        fx: &mut Vec<Effect>,
    ) {
        let policy = &self.config.timeouts;
        let tx = Transaction {
            kind,
            role,
            remote: uid,
            goal: goal.max(kind),
            renewed,
            redos: 0,
            deadline: now + policy.timeout(kind).as_millis() as u64,
            redo_at: now + policy.redo_interval.as_millis() as u64,
            last: Some(packet.clone()),
            progress,
        };
        if self.registry.insert(tx).is_some() {
            tracing::debug!("{kind}: restarted {role:?} transaction with {uid}");
        }
        self.stats.transactions_started += 1;
        if let Some(remote) = self.remotes.get(&uid) {
            fx.push(Effect::Send {
                to: remote.host_addr,
                packet,
            });
        }
    }

    /// Replace the last packet of a live transaction and send it.
    pub(crate) fn advance(&mut self, key: &TxKey, progress: Progress, packet: Packet, now: u64, fx: &mut Vec<Effect>) {
        let redo = self.config.timeouts.redo_interval.as_millis() as u64;
        let Some(tx) = self.registry.get_mut(key) else {
            return;
        };
        tx.progress = progress;
        tx.last = Some(packet.clone());
        tx.redo_at = now + redo;
        if let Some(remote) = self.remotes.get(&key.0) {
            fx.push(Effect::Send {
                to: remote.host_addr,
                packet,
            });
        }
    }

    /// Resend the last packet of a live transaction.
    pub(crate) fn resend(&self, key: &TxKey, fx: &mut Vec<Effect>) {
        let (Some(tx), Some(remote)) = (self.registry.get(key), self.remotes.get(&key.0)) else {
            return;
        };
        if let Some(packet) = &tx.last {
            fx.push(Effect::Send {
                to: remote.host_addr,
                packet: packet.clone(),
            });
        }
    }

    /// A removed transaction reached its stage; continue the chain.
    pub(crate) fn succeed(&mut self, tx: Transaction, now: u64, fx: &mut Vec<Effect>) {
        self.stats.transactions_completed += 1;
        if tx.goal > tx.kind {
            self.start(tx.remote, tx.goal, tx.renewed, now, fx);
        }
    }

    /// A removed initiator was refused. Terminal for this chain.
    pub(crate) fn fail(&mut self, tx: Transaction, reason: NackReason, fx: &mut Vec<Effect>) {
        self.stats.transactions_failed += 1;
        let uid = tx.remote;
        if tx.role == Role::Correspondent {
            tracing::debug!("{}: abandoned correspondent exchange with {uid}: {reason}", tx.kind);
            return;
        }
        if let Some(remote) = self.remotes.get_mut(&uid) {
            match tx.kind {
                Kind::Join => {}
                Kind::Allow => {
                    remote.set_allowed(Tristate::False);
                }
                Kind::Alive => {
                    remote.set_alived(Tristate::False);
                }
            }
            tracing::info!("{}: rejected by {} ({uid}): {reason}", tx.kind, remote.name);
        }
        fx.push(Effect::Emit(StackEvent::Rejected {
            uid,
            kind: tx.kind,
            reason,
        }));
    }

    /// Handle a nack for one of our initiators.
    ///
    /// A peer that lost state answers `Unjoined` or `Unallowed`; the first
    /// such nack in a chain downgrades the flag and renews the missing
    /// stage, a second one is final.
    pub(crate) fn on_nack(
        &mut self,
        packet: &Packet,
        kind: Kind,
        reason: NackReason,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), crate::RoadError> {
        let uid = packet.header.dest;
        let remote = self
            .remotes
            .get(&uid)
            .ok_or(crate::RoadError::UnknownRemote(uid))?;
        if let Some(vk) = remote.verify_key {
            packet.verify(&vk, self.crypto.as_ref())?;
        }
        let tx = self
            .registry
            .remove(&(uid, kind, Role::Initiator))
            .ok_or_else(|| crate::RoadError::invalid("nack without pending transaction"))?;

        let renew = match (kind, reason) {
            (Kind::Allow | Kind::Alive, NackReason::Unjoined) => Some(Kind::Join),
            (Kind::Alive, NackReason::Unallowed) => Some(Kind::Allow),
            _ => None,
        };
        match renew {
            Some(stage) if !tx.renewed => {
                if let Some(remote) = self.remotes.get_mut(&uid) {
                    tracing::info!(
                        "{kind}: {} ({uid}) lost state ({reason}), renewing {stage}",
                        remote.name
                    );
                    if stage == Kind::Join {
                        remote.set_joined(Tristate::Unknown);
                        fx.push(Effect::PersistRemote(uid));
                    } else {
                        remote.set_allowed(Tristate::Unknown);
                    }
                }
                self.start(uid, tx.goal, true, now, fx);
            }
            _ => self.fail(tx, reason, fx),
        }
        Ok(())
    }

    /// Drive redo and timeout timers.
    pub(crate) fn tick(&mut self, now: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        let redo = self.config.timeouts.redo_interval.as_millis() as u64;
        let max_redos = self.config.timeouts.max_redos;

        for key in self.registry.keys() {
            let Some(tx) = self.registry.get_mut(&key) else {
                continue;
            };
            if now >= tx.deadline {
                if let Some(tx) = self.registry.remove(&key) {
                    self.expire(tx, &mut fx);
                }
            } else if now >= tx.redo_at {
                tx.redo_at = now + redo;
                if tx.redos < max_redos {
                    tx.redos += 1;
                    self.resend(&key, &mut fx);
                }
            }
        }
        fx
    }

    fn expire(&mut self, tx: Transaction, fx: &mut Vec<Effect>) {
        let uid = tx.remote;
        if tx.role == Role::Correspondent {
            tracing::debug!("{}: correspondent exchange with {uid} timed out", tx.kind);
            return;
        }
        self.stats.transactions_failed += 1;
        let name = self
            .remotes
            .get(&uid)
            .map(|r| r.name.clone())
            .unwrap_or_default();
        tracing::info!("{}: {name} ({uid}) timed out", tx.kind);
        fx.push(Effect::Emit(StackEvent::TimedOut { uid, kind: tx.kind }));

        if tx.kind == Kind::Alive {
            if let Some(remote) = self.remotes.get_mut(&uid) {
                remote.set_alived(Tristate::False);
            }
            fx.push(Effect::Emit(StackEvent::Dead { uid }));
        }
    }
}
