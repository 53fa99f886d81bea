//! Presence manager.
//!
//! Each remote carries a `presence_due` deadline, pushed to
//! `now + period + offset` whenever it proves alive or gets probed.
//! `manage` probes every remote whose deadline has passed.

use crate::transaction::Effect;
use crate::types::{Kind, Uid};

use super::state::StackState;

impl StackState {
    /// Start alive probes for due remotes. Returns how many transactions
    /// were opened.
    ///
    /// Without `cascade` only joined and allowed remotes are probed; with it
    /// the others are carried through join and allow first. `immediate`
    /// ignores the deadlines.
    pub(crate) fn manage(&mut self, cascade: bool, immediate: bool, now: u64) -> (usize, Vec<Effect>) {
        let due: Vec<Uid> = self
            .remotes
            .values()
            .filter(|r| cascade || (r.joined().is_true() && r.allowed().is_true()))
            .filter(|r| immediate || now >= r.presence_due)
            .map(|r| r.uid)
            .collect();

        let mut fx = Vec::new();
        let mut started = 0;
        for uid in due {
            if let Some(remote) = self.remotes.get_mut(&uid) {
                remote.reschedule(now);
            }
            if self.start(uid, Kind::Alive, false, now, &mut fx) {
                started += 1;
            }
        }
        if started > 0 {
            tracing::debug!("presence: started {started} transactions");
        }
        (started, fx)
    }
}
