//! Road transport layer.
//!
//! A connectionless datagram seam: the road stack hands opaque byte buffers
//! to a [`Transport`] and polls it for inbound buffers. Nothing here knows
//! about packets, estates or transactions.
//!
//! # Quick start
//!
//! ```rust
//! use road_transport::{MemoryNetwork, Transport};
//!
//! # fn example() -> Result<(), road_transport::RoadTransportError> {
//! let network = MemoryNetwork::new();
//! let mut a = network.bind("127.0.0.1:7530".parse().unwrap())?;
//! let mut b = network.bind("127.0.0.1:7531".parse().unwrap())?;
//!
//! a.send(b.local_addr(), b"hello")?;
//! let (from, data) = b.receive()?.expect("queued datagram");
//! assert_eq!(from, a.local_addr());
//! assert_eq!(data, b"hello");
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod memory;
mod udp;

pub use config::TransportConfig;
pub use error::RoadTransportError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

/// Network address of a stack (host + port).
pub type HostAddr = std::net::SocketAddr;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Datagram transport consumed by the road stack.
///
/// Implementations never block: `receive` returns `Ok(None)` when nothing is
/// queued, and `send` either hands the buffer to the network or fails.
/// Delivery is unreliable; a datagram that cannot reach its destination is
/// simply lost.
pub trait Transport: Send {
    /// Address this transport is bound to.
    fn local_addr(&self) -> HostAddr;

    /// Send one datagram to `to`.
    fn send(&mut self, to: HostAddr, data: &[u8]) -> Result<(), RoadTransportError>;

    /// Take the next queued inbound datagram, if any.
    fn receive(&mut self) -> Result<Option<(HostAddr, Vec<u8>)>, RoadTransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_addr(&self) -> HostAddr {
        (**self).local_addr()
    }

    fn send(&mut self, to: HostAddr, data: &[u8]) -> Result<(), RoadTransportError> {
        (**self).send(to, data)
    }

    fn receive(&mut self) -> Result<Option<(HostAddr, Vec<u8>)>, RoadTransportError> {
        (**self).receive()
    }
}
