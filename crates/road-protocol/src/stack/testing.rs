//! Two stacks on one in-memory network, with hooks into their transports
//! and signing keys for tests that craft packets by hand.

use std::sync::Arc;
use std::time::Duration;

use road_transport::{MemoryNetwork, Transport};

use super::{RoadStack, StackConfig, StackEvent};
use crate::clock::ManualClock;
use crate::keep::MemoryKeep;
use crate::packet::{Body, Header, Packet};
use crate::types::{AutoMode, HostAddr, Kind, Uid};
use crate::DalekCrypto;

const STEP: Duration = Duration::from_millis(100);

pub(crate) fn addr(port: u16) -> HostAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// `main` on 7530 and `other` on 7531, `other` joined to `main`.
pub(crate) struct Pair {
    pub clock: ManualClock,
    pub main: RoadStack,
    pub other: RoadStack,
    /// `other`'s uid for `main`.
    pub uid: Uid,
    /// `main`'s uid for `other`.
    pub back: Uid,
    _network: MemoryNetwork,
}

impl Pair {
    /// Join, then run the chain up to `goal`.
    pub fn up_to(goal: Kind) -> Self {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(10_000);
        let open = |config: StackConfig, port: u16| {
            RoadStack::open(
                config,
                Box::new(network.bind(addr(port)).unwrap()),
                Box::new(MemoryKeep::new()),
                Arc::new(DalekCrypto),
                Arc::new(clock.clone()),
            )
            .unwrap()
        };
        let main = open(StackConfig::new("main").main(true).auto(AutoMode::Always), 7530);
        let other = open(StackConfig::new("other"), 7531);

        let mut pair = Self {
            clock,
            main,
            other,
            uid: 0,
            back: 0,
            _network: network,
        };
        pair.uid = pair.other.join_addr(addr(7530), false).unwrap();
        pair.service(5);
        pair.back = pair.main.remote_by_name("other").unwrap().uid();
        if goal >= Kind::Allow {
            pair.other.allow(Some(pair.uid), false).unwrap();
            pair.service(5);
        }
        if goal >= Kind::Alive {
            pair.other.alive(Some(pair.uid), false).unwrap();
            pair.service(5);
        }
        pair
    }

    /// Service both stacks `passes` times. Returns (main, other) events.
    pub fn service(&mut self, passes: usize) -> (Vec<StackEvent>, Vec<StackEvent>) {
        let (mut at_main, mut at_other) = (Vec::new(), Vec::new());
        for _ in 0..passes {
            at_main.extend(self.main.service_all());
            at_other.extend(self.other.service_all());
            self.clock.advance(STEP);
        }
        (at_main, at_other)
    }
}

/// Pull the next datagram queued for `stack` without handling it.
pub(crate) fn intercept(stack: &mut RoadStack) -> Option<Packet> {
    let (_, data) = stack.transport.receive().unwrap()?;
    Some(Packet::from_bytes(&data).unwrap())
}

/// Send `packet` to `to` from `stack`'s own address.
pub(crate) fn inject(stack: &mut RoadStack, to: HostAddr, packet: &Packet) {
    stack.transport.send(to, &packet.to_bytes().unwrap()).unwrap();
}

/// A packet from `stack` to its remote `uid`, signed with `stack`'s identity.
pub(crate) fn forge(stack: &RoadStack, uid: Uid, body: Body) -> Packet {
    let header: Header = stack.state.header_for(uid).unwrap();
    stack.state.sign(header, body).unwrap()
}
