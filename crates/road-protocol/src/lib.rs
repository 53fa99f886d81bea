//! Road protocol layer.
//!
//! Point-to-point session management between named stacks on top of
//! `road-transport` datagrams: join (admission and uid binding), allow
//! (ephemeral session keys) and alive (liveness), plus a presence manager
//! that keeps relationships fresh.
//!
//! Wire format: MessagePack (compact binary).
//! Crypto: Ed25519 signatures + X25519/HKDF + XChaCha20-Poly1305 boxes.
//! Keep: in-memory or SQLite persistence of the local and remote estates.

pub mod clock;
pub mod crypto;
pub mod error;
pub mod estate;
pub mod keep;
pub mod packet;
pub mod stack;
mod transaction;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{BoxKeypair, CryptoService, DalekCrypto, Sealed, SigningKeypair};
pub use error::RoadError;
pub use estate::{LocalEstate, RemoteEstate};
pub use keep::{Keep, LocalRecord, MemoryKeep, RemoteRecord, SqliteKeep};
pub use packet::{Body, Header, Identity, Packet};
pub use stack::{
    NewRemote, PresencePolicy, RoadStack, StackConfig, StackEvent, StackStats, TransactionPolicy,
};
pub use types::{AutoMode, HostAddr, Kind, NackReason, Role, Tristate, Uid, VACUOUS_UID};
