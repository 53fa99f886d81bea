use crate::types::{Kind, NackReason, Uid};

/// Something that happened to a remote during a service pass.
///
/// Informational only; the authoritative state is on the remote estate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Joined { uid: Uid },
    Allowed { uid: Uid },
    Alived { uid: Uid },
    Rejected { uid: Uid, kind: Kind, reason: NackReason },
    TimedOut { uid: Uid, kind: Kind },
    /// An alive probe went unanswered.
    Dead { uid: Uid },
}

impl StackEvent {
    pub fn uid(&self) -> Uid {
        match *self {
            StackEvent::Joined { uid }
            | StackEvent::Allowed { uid }
            | StackEvent::Alived { uid }
            | StackEvent::Rejected { uid, .. }
            | StackEvent::TimedOut { uid, .. }
            | StackEvent::Dead { uid } => uid,
        }
    }
}

/// Counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub packets_dropped: u64,
    pub transactions_started: u64,
    pub transactions_completed: u64,
    pub transactions_failed: u64,
}
