//! Local and remote estates.
//!
//! A `RemoteEstate` carries the three relationship flags. Their setters keep
//! the chain consistent: `alived` can only be true while `allowed` is,
//! `allowed` only while `joined` is, and losing a stage drops everything
//! above it together with the session.
use std::time::Duration;

use crate::crypto::{BoxKeypair, SigningKeypair};
use crate::keep::{LocalRecord, RemoteRecord};
use crate::packet::Identity;
use crate::types::{AutoMode, HostAddr, Tristate, Uid, VACUOUS_UID};

// ── Local ─────────────────────────────────────────────────────────────

/// This node's own identity.
#[derive(Debug, Clone)]
pub struct LocalEstate {
    pub(crate) name: String,
    pub(crate) uid: Uid,
    pub(crate) host_addr: HostAddr,
    pub(crate) signer: SigningKeypair,
    pub(crate) boxer: BoxKeypair,
    pub(crate) main: bool,
    pub(crate) auto: AutoMode,
}

impl LocalEstate {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uid assigned to this node by the main it first joined (0 until then).
    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn host_addr(&self) -> HostAddr {
        self.host_addr
    }

    pub fn verify_key(&self) -> [u8; 32] {
        self.signer.verify_key()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.boxer.public()
    }

    pub fn main(&self) -> bool {
        self.main
    }

    pub fn auto(&self) -> AutoMode {
        self.auto
    }

    pub(crate) fn identity(&self) -> Identity {
        Identity {
            name: self.name.clone(),
            host_addr: self.host_addr,
            verify_key: self.verify_key(),
            public_key: self.public_key(),
        }
    }

    pub(crate) fn from_record(record: LocalRecord, host_addr: HostAddr) -> Self {
        Self {
            name: record.name,
            uid: record.uid,
            host_addr,
            signer: SigningKeypair::from_seed(record.signing_seed),
            boxer: BoxKeypair::from_secret(record.box_secret),
            main: record.main,
            auto: record.auto,
        }
    }

    pub(crate) fn to_record(&self) -> LocalRecord {
        LocalRecord {
            name: self.name.clone(),
            uid: self.uid,
            host_addr: self.host_addr,
            signing_seed: *self.signer.seed(),
            box_secret: *self.boxer.secret(),
            main: self.main,
            auto: self.auto,
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────

/// Ephemeral key material from a completed allow.
#[derive(Clone)]
pub(crate) struct Session {
    pub secret: [u8; 32],
    pub peer: [u8; 32],
    /// Last alive sequence sent under this session.
    pub tx_seq: u64,
    /// Last alive sequence accepted under this session.
    pub rx_seq: u64,
}

impl Session {
    pub fn new(own: &BoxKeypair, peer: [u8; 32]) -> Self {
        Self {
            secret: *own.secret(),
            peer,
            tx_seq: 0,
            rx_seq: 0,
        }
    }
}

// ── Remote ────────────────────────────────────────────────────────────

/// One known peer.
#[derive(Clone)]
pub struct RemoteEstate {
    pub(crate) uid: Uid,
    pub(crate) far_uid: Uid,
    pub(crate) name: String,
    pub(crate) host_addr: HostAddr,
    pub(crate) verify_key: Option<[u8; 32]>,
    pub(crate) public_key: Option<[u8; 32]>,
    joined: Tristate,
    allowed: Tristate,
    alived: Tristate,
    pub(crate) session: Option<Session>,
    pub(crate) last_alive: Option<u64>,
    pub(crate) period: Duration,
    pub(crate) offset: Duration,
    /// Next time the presence manager probes this remote.
    pub(crate) presence_due: u64,
}

impl RemoteEstate {
    pub(crate) fn new(
        uid: Uid,
        name: String,
        host_addr: HostAddr,
        period: Duration,
        offset: Duration,
        now: u64,
    ) -> Self {
        let mut remote = Self {
            uid,
            far_uid: VACUOUS_UID,
            name,
            host_addr,
            verify_key: None,
            public_key: None,
            joined: Tristate::Unknown,
            allowed: Tristate::Unknown,
            alived: Tristate::Unknown,
            session: None,
            last_alive: None,
            period,
            offset,
            presence_due: 0,
        };
        remote.reschedule(now);
        remote
    }

    /// Rebuild a remote from the keep. Only `joined` survives; the session
    /// flags start over and the presence timer restarts from `now`.
    pub(crate) fn restore(record: RemoteRecord, period: Duration, offset: Duration, now: u64) -> Self {
        let mut remote = Self::new(record.uid, record.name, record.host_addr, period, offset, now);
        remote.far_uid = record.far_uid;
        remote.verify_key = record.verify_key;
        remote.public_key = record.public_key;
        if remote.has_keys() {
            remote.joined = record.joined;
        }
        remote
    }

    pub(crate) fn to_record(&self) -> RemoteRecord {
        RemoteRecord {
            uid: self.uid,
            far_uid: self.far_uid,
            name: self.name.clone(),
            host_addr: self.host_addr,
            verify_key: self.verify_key,
            public_key: self.public_key,
            joined: self.joined,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Our id for this relationship, as the peer addresses us. Same as `uid`.
    pub fn near_uid(&self) -> Uid {
        self.uid
    }

    /// The peer's id for this relationship; zero until joined.
    pub fn far_uid(&self) -> Uid {
        self.far_uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_addr(&self) -> HostAddr {
        self.host_addr
    }

    pub fn verify_key(&self) -> Option<[u8; 32]> {
        self.verify_key
    }

    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.public_key
    }

    pub fn joined(&self) -> Tristate {
        self.joined
    }

    pub fn allowed(&self) -> Tristate {
        self.allowed
    }

    pub fn alived(&self) -> Tristate {
        self.alived
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn last_alive(&self) -> Option<u64> {
        self.last_alive
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub(crate) fn has_keys(&self) -> bool {
        self.verify_key.is_some() && self.public_key.is_some()
    }

    // ── Flag transitions ──────────────────────────────────────────────

    /// Set `joined`. Anything but true drops `allowed`, `alived` and the
    /// session. Returns false if `True` was asked without identity keys.
    pub fn set_joined(&mut self, value: Tristate) -> bool {
        if value.is_true() && !self.has_keys() {
            return false;
        }
        if !value.is_true() {
            self.drop_session();
            self.allowed = Tristate::Unknown;
            self.alived = Tristate::Unknown;
        }
        self.joined = value;
        true
    }

    /// Set `allowed`. Anything but true drops `alived` and the session.
    /// True needs a joined remote and is normally reached through
    /// [`establish`](Self::establish).
    pub fn set_allowed(&mut self, value: Tristate) -> bool {
        if value.is_true() && !(self.joined.is_true() && self.session.is_some()) {
            return false;
        }
        if !value.is_true() {
            self.drop_session();
            self.alived = Tristate::Unknown;
        }
        self.allowed = value;
        true
    }

    /// Set `alived`. True needs an allowed remote.
    pub fn set_alived(&mut self, value: Tristate) -> bool {
        if value.is_true() && !self.allowed.is_true() {
            return false;
        }
        self.alived = value;
        true
    }

    /// Override the presence schedule for this remote.
    pub fn set_presence(&mut self, period: Duration, offset: Duration) {
        self.period = period;
        self.offset = offset;
    }

    /// Install a fresh session and mark the remote allowed.
    pub(crate) fn establish(&mut self, session: Session) -> bool {
        if !self.joined.is_true() {
            return false;
        }
        self.session = Some(session);
        self.allowed = Tristate::True;
        true
    }

    /// Record a confirmed round trip or an authenticated probe.
    pub(crate) fn mark_alive(&mut self, now: u64) {
        if self.set_alived(Tristate::True) {
            self.last_alive = Some(now);
            self.reschedule(now);
        }
    }

    /// Install identity keys learned during a join. Returns true when they
    /// replaced different keys, in which case the session is no longer valid.
    pub(crate) fn install_keys(&mut self, verify_key: [u8; 32], public_key: [u8; 32]) -> bool {
        let changed = self.has_keys()
            && (self.verify_key != Some(verify_key) || self.public_key != Some(public_key));
        self.verify_key = Some(verify_key);
        self.public_key = Some(public_key);
        if changed {
            self.set_allowed(Tristate::Unknown);
        }
        changed
    }

    pub(crate) fn reschedule(&mut self, now: u64) {
        self.presence_due = now + (self.period + self.offset).as_millis() as u64;
    }

    fn drop_session(&mut self) {
        self.session = None;
    }
}

impl std::fmt::Debug for RemoteEstate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEstate")
            .field("uid", &self.uid)
            .field("far_uid", &self.far_uid)
            .field("name", &self.name)
            .field("host_addr", &self.host_addr)
            .field("joined", &self.joined)
            .field("allowed", &self.allowed)
            .field("alived", &self.alived)
            .field("session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn remote() -> RemoteEstate {
        RemoteEstate::new(
            1,
            "peer".into(),
            "127.0.0.1:7531".parse().unwrap(),
            Duration::from_secs(1),
            Duration::from_millis(500),
            0,
        )
    }

    fn allowed_remote() -> RemoteEstate {
        let mut r = remote();
        r.install_keys([1; 32], [2; 32]);
        assert!(r.set_joined(Tristate::True));
        assert!(r.establish(Session::new(&BoxKeypair::from_secret([3; 32]), [4; 32])));
        r
    }

    #[test]
    fn new_remote_is_vacuous_and_unknown() {
        let r = remote();
        assert_eq!(r.far_uid(), VACUOUS_UID);
        assert_eq!(r.joined(), Tristate::Unknown);
        assert_eq!(r.presence_due, 1_500);
    }

    #[test]
    fn joined_requires_keys() {
        let mut r = remote();
        assert!(!r.set_joined(Tristate::True));
        r.install_keys([1; 32], [2; 32]);
        assert!(r.set_joined(Tristate::True));
    }

    #[test]
    fn unjoin_downgrades_everything() {
        let mut r = allowed_remote();
        r.mark_alive(10);
        assert_eq!(r.alived(), Tristate::True);

        r.set_joined(Tristate::Unknown);
        assert_eq!(r.allowed(), Tristate::Unknown);
        assert_eq!(r.alived(), Tristate::Unknown);
        assert!(!r.has_session());
    }

    #[test]
    fn disallow_drops_session_and_alive() {
        let mut r = allowed_remote();
        r.mark_alive(10);
        r.set_allowed(Tristate::False);
        assert_eq!(r.joined(), Tristate::True);
        assert_eq!(r.allowed(), Tristate::False);
        assert_eq!(r.alived(), Tristate::Unknown);
        assert!(!r.has_session());
    }

    #[test]
    fn alive_needs_allowed() {
        let mut r = remote();
        assert!(!r.set_alived(Tristate::True));
        r.mark_alive(5);
        assert_eq!(r.last_alive(), None);
        assert!(r.set_alived(Tristate::False));
    }

    #[test]
    fn key_change_drops_session() {
        let mut r = allowed_remote();
        assert!(!r.install_keys([1; 32], [2; 32]));
        assert!(r.has_session());
        assert!(r.install_keys([9; 32], [2; 32]));
        assert!(!r.has_session());
        assert_eq!(r.allowed(), Tristate::Unknown);
        assert_eq!(r.joined(), Tristate::True);
    }

    #[test]
    fn restore_keeps_joined_only() {
        let mut r = allowed_remote();
        r.far_uid = 4;
        r.mark_alive(10);
        let record = r.to_record();

        let restored = RemoteEstate::restore(
            record,
            Duration::from_secs(1),
            Duration::from_millis(500),
            50,
        );
        assert_eq!(restored.far_uid(), 4);
        assert_eq!(restored.joined(), Tristate::True);
        assert_eq!(restored.allowed(), Tristate::Unknown);
        assert_eq!(restored.alived(), Tristate::Unknown);
        assert!(!restored.has_session());
        assert_eq!(restored.last_alive(), None);
    }

    fn flag() -> impl Strategy<Value = Tristate> {
        prop_oneof![
            Just(Tristate::Unknown),
            Just(Tristate::True),
            Just(Tristate::False)
        ]
    }

    proptest! {
        /// No sequence of setter calls breaks the flag chain.
        #[test]
        fn flag_chain_invariant_holds(ops in prop::collection::vec((0..4u8, flag()), 0..40)) {
            let mut r = remote();
            for (op, value) in ops {
                match op {
                    0 => {
                        r.install_keys([1; 32], [2; 32]);
                        r.set_joined(value);
                    }
                    1 => {
                        if value.is_true() {
                            r.establish(Session::new(&BoxKeypair::from_secret([3; 32]), [4; 32]));
                        } else {
                            r.set_allowed(value);
                        }
                    }
                    2 => {
                        r.set_alived(value);
                    }
                    _ => r.mark_alive(7),
                }
                if r.allowed().is_true() {
                    prop_assert!(r.joined().is_true());
                    prop_assert!(r.has_session());
                }
                if r.alived().is_true() {
                    prop_assert!(r.allowed().is_true());
                }
                if r.joined().is_true() {
                    prop_assert!(r.has_keys());
                }
            }
        }
    }
}
