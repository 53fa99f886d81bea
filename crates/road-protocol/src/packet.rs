use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoService, Sealed};
use crate::error::RoadError;
use crate::types::{HostAddr, Kind, NackReason, Uid};

/// Relationship addressing carried by every packet.
///
/// `source` is the sender's uid for the relationship, `dest` the uid the
/// receiver uses for it. A join request with `dest == 0` is vacuous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub source: Uid,
    pub dest: Uid,
}

/// Self-asserted identity exchanged during a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub host_addr: HostAddr,
    pub verify_key: [u8; 32],
    pub public_key: [u8; 32],
}

/// Packet payload. One variant per protocol step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    JoinRequest {
        identity: Identity,
    },
    /// `assigned` is the correspondent's uid for the initiator.
    JoinAccept {
        identity: Identity,
        assigned: Uid,
    },
    JoinAck,
    /// Initiator ephemeral key and a challenge boxed to the correspondent's
    /// long-term key.
    AllowHello {
        ephemeral: [u8; 32],
        challenge: Sealed,
    },
    /// Correspondent ephemeral key and `challenge ‖ counter` boxed between
    /// the two ephemerals.
    AllowCookie {
        ephemeral: [u8; 32],
        cookie: Sealed,
    },
    /// The counter, boxed back.
    AllowInitiate {
        proof: Sealed,
    },
    AllowAck,
    AliveRequest {
        probe: Sealed,
    },
    AliveAck {
        probe: Sealed,
    },
    Nack {
        kind: Kind,
        reason: NackReason,
    },
}

impl Body {
    /// Transaction kind this body belongs to.
    pub fn kind(&self) -> Kind {
        match self {
            Body::JoinRequest { .. } | Body::JoinAccept { .. } | Body::JoinAck => Kind::Join,
            Body::AllowHello { .. }
            | Body::AllowCookie { .. }
            | Body::AllowInitiate { .. }
            | Body::AllowAck => Kind::Allow,
            Body::AliveRequest { .. } | Body::AliveAck { .. } => Kind::Alive,
            Body::Nack { kind, .. } => *kind,
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Body::JoinRequest { .. } => "join-request",
            Body::JoinAccept { .. } => "join-accept",
            Body::JoinAck => "join-ack",
            Body::AllowHello { .. } => "allow-hello",
            Body::AllowCookie { .. } => "allow-cookie",
            Body::AllowInitiate { .. } => "allow-initiate",
            Body::AllowAck => "allow-ack",
            Body::AliveRequest { .. } => "alive-request",
            Body::AliveAck { .. } => "alive-ack",
            Body::Nack { .. } => "nack",
        }
    }
}

/// Wire unit of the road protocol.
///
/// Serialized as MessagePack. Join, allow and nack packets carry an Ed25519
/// signature over `signing_bytes()`; alive packets are authenticated by the
/// session box instead and leave `signature` empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: Header,
    pub body: Body,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct Signable<'a> {
    header: &'a Header,
    body: &'a Body,
}

impl Packet {
    pub fn unsigned(header: Header, body: Body) -> Self {
        Self {
            header,
            body,
            signature: Vec::new(),
        }
    }

    /// Build and sign a packet with a 32-byte Ed25519 seed.
    pub fn signed(
        header: Header,
        body: Body,
        seed: &[u8; 32],
        crypto: &dyn CryptoService,
    ) -> Result<Self, RoadError> {
        let mut packet = Self::unsigned(header, body);
        packet.signature = crypto.sign(seed, &packet.signing_bytes()?);
        Ok(packet)
    }

    /// Canonical bytes to sign: header and body, never the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, RoadError> {
        let signable = Signable {
            header: &self.header,
            body: &self.body,
        };
        Ok(rmp_serde::to_vec(&signable)?)
    }

    pub fn verify(&self, verify_key: &[u8; 32], crypto: &dyn CryptoService) -> Result<(), RoadError> {
        if self.signature.is_empty() {
            return Err(RoadError::InvalidSignature);
        }
        crypto.verify(verify_key, &self.signing_bytes()?, &self.signature)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RoadError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RoadError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
