use crate::packet::{Body, Packet};
use crate::transaction::Effect;
use crate::types::HostAddr;

use super::state::StackState;

impl StackState {
    /// Decode one datagram and route it to its handler.
    ///
    /// Anything malformed or unroutable is dropped and counted; nothing here
    /// fails the service loop.
    pub(crate) fn handle_datagram(&mut self, from: HostAddr, data: &[u8], now: u64) -> Vec<Effect> {
        self.stats.packets_in += 1;
        let mut fx = Vec::new();

        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.packets_dropped += 1;
                tracing::debug!("drop datagram from {from}: {e}");
                return fx;
            }
        };

        let result = match &packet.body {
            Body::JoinRequest { identity } => self.on_join_request(from, &packet, identity, now, &mut fx),
            Body::JoinAccept { identity, assigned } => {
                self.on_join_accept(from, &packet, identity, *assigned, now, &mut fx)
            }
            Body::JoinAck => self.on_join_ack(&packet, now, &mut fx),
            Body::AllowHello {
                ephemeral,
                challenge,
            } => self.on_allow_hello(from, &packet, *ephemeral, challenge, now, &mut fx),
            Body::AllowCookie { ephemeral, cookie } => {
                self.on_allow_cookie(&packet, *ephemeral, cookie, now, &mut fx)
            }
            Body::AllowInitiate { proof } => self.on_allow_initiate(from, &packet, proof, now, &mut fx),
            Body::AllowAck => self.on_allow_ack(&packet, now, &mut fx),
            Body::AliveRequest { probe } => self.on_alive_request(from, &packet, probe, now, &mut fx),
            Body::AliveAck { probe } => self.on_alive_ack(from, &packet, probe, now, &mut fx),
            Body::Nack { kind, reason } => self.on_nack(&packet, *kind, *reason, now, &mut fx),
        };

        if let Err(e) = result {
            self.stats.packets_dropped += 1;
            tracing::debug!(
                "drop {} from {from} ({} -> {}): {e}",
                packet.body.label(),
                packet.header.source,
                packet.header.dest
            );
        }
        fx
    }
}
