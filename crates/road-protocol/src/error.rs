use crate::types::Uid;

/// Protocol-level errors for the road stack.
///
/// Wraps transport errors and adds keep, crypto and packet variants.
/// Protocol outcomes (rejections, timeouts) are never errors: they end up
/// as flag transitions and [`StackEvent`](crate::StackEvent)s.
#[derive(Debug, thiserror::Error)]
pub enum RoadError {
    #[error("transport error: {0}")]
    Transport(#[from] road_transport::RoadTransportError),

    #[error("keep error: {0}")]
    Keep(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid packet: {reason}")]
    InvalidPacket { reason: String },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("unknown remote: {0}")]
    UnknownRemote(Uid),

    #[error("no free remote uids left")]
    UidsExhausted,

    #[error("remote already exists: {0}")]
    DuplicateRemote(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RoadError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RoadError::InvalidPacket {
            reason: reason.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for RoadError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RoadError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RoadError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RoadError::Deserialization(e.to_string())
    }
}

impl From<rusqlite::Error> for RoadError {
    fn from(e: rusqlite::Error) -> Self {
        RoadError::Keep(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_packet() {
        let err = RoadError::invalid("source mismatch");
        assert_eq!(err.to_string(), "invalid packet: source mismatch");
    }

    #[test]
    fn test_display_unknown_remote() {
        assert_eq!(RoadError::UnknownRemote(7).to_string(), "unknown remote: 7");
    }

    #[test]
    fn test_display_invalid_signature() {
        let err = RoadError::InvalidSignature;
        assert_eq!(err.to_string(), "signature verification failed");
    }

    #[test]
    fn test_transport_error_wraps() {
        let inner = road_transport::RoadTransportError::AddrInUse("127.0.0.1:1".parse().unwrap());
        let err: RoadError = inner.into();
        assert_eq!(err.to_string(), "transport error: address already bound: 127.0.0.1:1");
    }
}
