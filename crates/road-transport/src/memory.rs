//! In-memory datagram network.
//!
//! Every bound endpoint owns an inbound queue inside a shared hub. Sending
//! pushes onto the destination queue; receiving pops from the own queue.
//! Used by simulations and tests so several stacks can run in one process
//! under a manual clock without touching sockets.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{HostAddr, RoadTransportError, Transport, TransportConfig};

#[derive(Default)]
struct Hub {
    queues: HashMap<HostAddr, VecDeque<(HostAddr, Vec<u8>)>>,
    /// Endpoints whose inbound traffic is currently discarded.
    severed: Vec<HostAddr>,
    lost: u64,
}

/// Shared in-memory network. Cheap to clone; all clones see the same hub.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    config: TransportConfig,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            hub: Arc::default(),
            config,
        }
    }

    /// Bind a new endpoint at `addr`.
    pub fn bind(&self, addr: HostAddr) -> Result<MemoryTransport, RoadTransportError> {
        let mut hub = self.lock();
        if hub.queues.contains_key(&addr) {
            return Err(RoadTransportError::AddrInUse(addr));
        }
        hub.queues.insert(addr, VecDeque::new());
        Ok(MemoryTransport {
            addr,
            network: self.clone(),
        })
    }

    /// Number of datagrams waiting at `addr`.
    pub fn pending(&self, addr: HostAddr) -> usize {
        self.lock().queues.get(&addr).map(VecDeque::len).unwrap_or(0)
    }

    /// Discard (or stop discarding) every datagram addressed to `addr`.
    pub fn sever(&self, addr: HostAddr, severed: bool) {
        let mut hub = self.lock();
        hub.severed.retain(|a| *a != addr);
        if severed {
            hub.severed.push(addr);
            if let Some(queue) = hub.queues.get_mut(&addr) {
                queue.clear();
            }
        }
    }

    /// Datagrams lost so far (unbound destination, severed link, full queue).
    pub fn lost(&self) -> u64 {
        self.lock().lost
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One endpoint on a [`MemoryNetwork`]. Dropping it unbinds the address.
pub struct MemoryTransport {
    addr: HostAddr,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> HostAddr {
        self.addr
    }

    fn send(&mut self, to: HostAddr, data: &[u8]) -> Result<(), RoadTransportError> {
        let max = self.network.config.max_datagram_size;
        if data.len() > max {
            return Err(RoadTransportError::MessageTooLarge {
                size: data.len(),
                max,
            });
        }

        let limit = self.network.config.queue_limit;
        let mut hub = self.network.lock();
        if hub.severed.contains(&to) {
            hub.lost += 1;
            return Ok(());
        }
        match hub.queues.get_mut(&to) {
            Some(queue) if queue.len() < limit => {
                queue.push_back((self.addr, data.to_vec()));
            }
            Some(_) => {
                tracing::debug!("memory: queue full at {to}, datagram lost");
                hub.lost += 1;
            }
            None => {
                tracing::debug!("memory: no endpoint at {to}, datagram lost");
                hub.lost += 1;
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<(HostAddr, Vec<u8>)>, RoadTransportError> {
        Ok(self
            .network
            .lock()
            .queues
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front))
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.lock().queues.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> HostAddr {
        HostAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn send_and_receive_in_order() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr(1)).unwrap();
        let mut b = network.bind(addr(2)).unwrap();

        a.send(addr(2), b"one").unwrap();
        a.send(addr(2), b"two").unwrap();
        assert_eq!(network.pending(addr(2)), 2);

        assert_eq!(b.receive().unwrap(), Some((addr(1), b"one".to_vec())));
        assert_eq!(b.receive().unwrap(), Some((addr(1), b"two".to_vec())));
        assert_eq!(b.receive().unwrap(), None);
    }

    #[test]
    fn double_bind_rejected() {
        let network = MemoryNetwork::new();
        let _a = network.bind(addr(1)).unwrap();
        assert!(matches!(
            network.bind(addr(1)),
            Err(RoadTransportError::AddrInUse(_))
        ));
    }

    #[test]
    fn unbound_destination_is_lost() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr(1)).unwrap();
        a.send(addr(9), b"void").unwrap();
        assert_eq!(network.lost(), 1);
    }

    #[test]
    fn drop_unbinds() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr(1)).unwrap();
        drop(a);
        assert!(network.bind(addr(1)).is_ok());
    }

    #[test]
    fn severed_endpoint_loses_traffic() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr(1)).unwrap();
        let mut b = network.bind(addr(2)).unwrap();

        network.sever(addr(2), true);
        a.send(addr(2), b"lost").unwrap();
        assert_eq!(b.receive().unwrap(), None);

        network.sever(addr(2), false);
        a.send(addr(2), b"kept").unwrap();
        assert_eq!(b.receive().unwrap(), Some((addr(1), b"kept".to_vec())));
        assert_eq!(network.lost(), 1);
    }

    #[test]
    fn oversized_datagram_rejected() {
        let network = MemoryNetwork::with_config(TransportConfig::new().max_datagram_size(4));
        let mut a = network.bind(addr(1)).unwrap();
        let _b = network.bind(addr(2)).unwrap();
        assert!(matches!(
            a.send(addr(2), b"too long"),
            Err(RoadTransportError::MessageTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn queue_limit_drops_excess() {
        let network = MemoryNetwork::with_config(TransportConfig::new().queue_limit(1));
        let mut a = network.bind(addr(1)).unwrap();
        let _b = network.bind(addr(2)).unwrap();
        a.send(addr(2), b"first").unwrap();
        a.send(addr(2), b"second").unwrap();
        assert_eq!(network.pending(addr(2)), 1);
        assert_eq!(network.lost(), 1);
    }
}
