use crate::HostAddr;

/// Errors returned by the road transport layer.
#[derive(Debug, thiserror::Error)]
pub enum RoadTransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: HostAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("address already bound: {0}")]
    AddrInUse(HostAddr),

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: HostAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("datagram too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}
