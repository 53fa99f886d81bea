//! Shared simulation harness: stacks on one in-memory network, driven by a
//! shared manual clock.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use road_protocol::{
    AutoMode, DalekCrypto, HostAddr, Keep, ManualClock, MemoryKeep, RoadStack, StackConfig,
    StackEvent,
};
use road_transport::MemoryNetwork;

/// Clock step per service pass.
pub const STEP: Duration = Duration::from_millis(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

pub fn addr(port: u16) -> HostAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

pub fn main_config(name: &str, auto: AutoMode) -> StackConfig {
    StackConfig::new(name).main(true).auto(auto)
}

pub struct Sim {
    pub network: MemoryNetwork,
    pub clock: ManualClock,
}

impl Sim {
    pub fn new() -> Self {
        init_tracing();
        Self {
            network: MemoryNetwork::new(),
            clock: ManualClock::new(10_000),
        }
    }

    pub fn stack(&self, config: StackConfig, port: u16) -> RoadStack {
        self.stack_with_keep(config, port, Box::new(MemoryKeep::new()))
    }

    pub fn stack_with_keep(&self, config: StackConfig, port: u16, keep: Box<dyn Keep>) -> RoadStack {
        let transport = self.network.bind(addr(port)).unwrap();
        RoadStack::open(
            config,
            Box::new(transport),
            keep,
            Arc::new(DalekCrypto),
            Arc::new(self.clock.clone()),
        )
        .unwrap()
    }

    /// Run `passes` service rounds over every stack, advancing the clock by
    /// [`STEP`] after each. Returns the events seen by each stack.
    pub fn service(&self, stacks: &mut [&mut RoadStack], passes: usize) -> Vec<Vec<StackEvent>> {
        let mut events = vec![Vec::new(); stacks.len()];
        for _ in 0..passes {
            for (stack, seen) in stacks.iter_mut().zip(events.iter_mut()) {
                seen.extend(stack.service_all());
            }
            self.clock.advance(STEP);
        }
        events
    }
}
