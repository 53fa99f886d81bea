use serde::{Deserialize, Serialize};

use crate::MAX_DATAGRAM_SIZE;

/// Configuration for a [`Transport`](crate::Transport) implementation.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use road_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_datagram_size(8 * 1024)
///     .queue_limit(512);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest datagram accepted for sending or receiving.
    pub(crate) max_datagram_size: usize,
    /// Maximum queued inbound datagrams per endpoint (memory transport only).
    /// Datagrams beyond the limit are dropped, as a full socket buffer would.
    pub(crate) queue_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            max_datagram_size: MAX_DATAGRAM_SIZE,
            queue_limit: 4096,
        }
    }

    /// Set the maximum datagram size (default: 65 507 bytes).
    pub fn max_datagram_size(mut self, bytes: usize) -> Self {
        self.max_datagram_size = bytes.min(MAX_DATAGRAM_SIZE);
        self
    }

    /// Set the inbound queue limit for in-memory endpoints (default: 4096).
    pub fn queue_limit(mut self, datagrams: usize) -> Self {
        self.queue_limit = datagrams;
        self
    }
}
