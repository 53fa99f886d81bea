use serde::Serialize;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use road_protocol::StackEvent;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub name: String,
    pub uid: u32,
    pub listen: String,
    pub main: bool,
    pub auto: String,
    pub remotes: usize,
    pub timestamp: u64,
}

#[derive(Serialize)]
pub struct EventStopped {
    pub event: &'static str,
    pub name: String,
    pub elapsed_s: f64,
    pub packets_in: u64,
    pub packets_out: u64,
    pub packets_dropped: u64,
}

// ── Stack events ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventRemote {
    pub event: &'static str,
    pub uid: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_s: f64,
}

impl EventRemote {
    pub fn from_stack(event: &StackEvent, name: &str, elapsed_s: f64) -> Self {
        let (label, kind, reason) = match *event {
            StackEvent::Joined { .. } => ("joined", None, None),
            StackEvent::Allowed { .. } => ("allowed", None, None),
            StackEvent::Alived { .. } => ("alived", None, None),
            StackEvent::Rejected { kind, reason, .. } => {
                ("rejected", Some(kind.to_string()), Some(reason.to_string()))
            }
            StackEvent::TimedOut { kind, .. } => ("timed_out", Some(kind.to_string()), None),
            StackEvent::Dead { .. } => ("dead", None, None),
        };
        Self {
            event: label,
            uid: event.uid(),
            name: name.to_string(),
            kind,
            reason,
            elapsed_s,
        }
    }
}
