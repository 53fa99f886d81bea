//! Alive: sequenced liveness probe sealed under the session.
//!
//! The correspondent answers statelessly, tracking only the last accepted
//! sequence per session. A fresh authenticated probe also tells the
//! correspondent that the prober is alive.

use crate::packet::{Body, Header, Packet};
use crate::stack::state::StackState;
use crate::stack::StackEvent;
use crate::types::{HostAddr, Kind, NackReason, Role, Uid};
use crate::RoadError;

use super::{Effect, Progress, TxKey};

/// Direction tags: the session key is shared both ways, so the sealed
/// payload names its direction and the header it travelled under.
const REQUEST_TAG: u8 = b'Q';
const ACK_TAG: u8 = b'A';
const PROBE_LEN: usize = 1 + 4 + 4 + 8;

fn encode_probe(tag: u8, header: Header, seq: u64) -> Vec<u8> {
    let mut plain = Vec::with_capacity(PROBE_LEN);
    plain.push(tag);
    plain.extend_from_slice(&header.source.to_be_bytes());
    plain.extend_from_slice(&header.dest.to_be_bytes());
    plain.extend_from_slice(&seq.to_be_bytes());
    plain
}

fn decode_probe(plain: Vec<u8>, tag: u8, header: Header) -> Result<u64, RoadError> {
    let bytes: [u8; PROBE_LEN] = plain
        .try_into()
        .map_err(|_| RoadError::invalid("malformed alive probe"))?;
    if bytes[0] != tag {
        return Err(RoadError::invalid("alive probe direction mismatch"));
    }
    let source = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let dest = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
    if source != header.source || dest != header.dest {
        return Err(RoadError::invalid("alive probe header mismatch"));
    }
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&bytes[9..]);
    Ok(u64::from_be_bytes(seq))
}

impl StackState {
    pub(crate) fn alive_begin(
        &mut self,
        uid: Uid,
        renewed: bool,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let remote = self.remotes.get_mut(&uid).ok_or(RoadError::UnknownRemote(uid))?;
        let session = remote
            .session
            .as_mut()
            .ok_or_else(|| RoadError::invalid("alive without session"))?;
        session.tx_seq += 1;
        let seq = session.tx_seq;
        let header = Header {
            source: remote.uid,
            dest: remote.far_uid,
        };
        let probe = self.crypto.seal(
            &session.secret,
            &session.peer,
            &encode_probe(REQUEST_TAG, header, seq),
        )?;

        let packet = Packet::unsigned(header, Body::AliveRequest { probe });
        tracing::debug!("alive: probe {seq} to remote {uid}");
        self.open(
            Kind::Alive,
            Role::Initiator,
            uid,
            Kind::Alive,
            renewed,
            Progress::Alive { seq },
            packet,
            now,
            fx,
        );
        Ok(())
    }

    /// Correspondent: answer a probe.
    pub(crate) fn on_alive_request(
        &mut self,
        from: HostAddr,
        packet: &Packet,
        probe: &crate::crypto::Sealed,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let header = packet.header;
        let uid = header.dest;
        let Some(remote) = self.remotes.get(&uid) else {
            return self.nack(from, header, None, Kind::Alive, NackReason::Unjoined, fx);
        };
        if remote.far_uid != header.source {
            return Err(RoadError::invalid("alive source mismatch"));
        }
        if !remote.joined().is_true() {
            return self.nack(from, header, Some(uid), Kind::Alive, NackReason::Unjoined, fx);
        }
        let opened = remote
            .session
            .as_ref()
            .map(|s| self.crypto.open(&s.secret, &s.peer, probe));
        let seq = match opened {
            Some(Ok(plain)) => decode_probe(plain, REQUEST_TAG, header)?,
            _ => return self.nack(from, header, Some(uid), Kind::Alive, NackReason::Unallowed, fx),
        };

        let Some(remote) = self.remotes.get_mut(&uid) else {
            return Ok(());
        };
        let Some(session) = remote.session.as_mut() else {
            return Ok(());
        };
        if seq < session.rx_seq {
            return Err(RoadError::invalid("replayed alive probe"));
        }
        let fresh = seq > session.rx_seq;
        session.rx_seq = seq;
        let reply_header = Header {
            source: remote.uid,
            dest: remote.far_uid,
        };
        let ack = self.crypto.seal(
            &session.secret,
            &session.peer,
            &encode_probe(ACK_TAG, reply_header, seq),
        )?;

        if fresh {
            let was_alive = remote.alived().is_true();
            remote.mark_alive(now);
            if !was_alive {
                fx.push(Effect::Emit(StackEvent::Alived { uid }));
            }
        }
        let reply = Packet::unsigned(reply_header, Body::AliveAck { probe: ack });
        fx.push(Effect::Send { to: from, packet: reply });
        Ok(())
    }

    /// Initiator: the probe came back.
    pub(crate) fn on_alive_ack(
        &mut self,
        from: HostAddr,
        packet: &Packet,
        probe: &crate::crypto::Sealed,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let uid = packet.header.dest;
        let remote = self.remotes.get(&uid).ok_or(RoadError::UnknownRemote(uid))?;
        if remote.far_uid != packet.header.source {
            return Err(RoadError::invalid("alive source mismatch"));
        }
        if remote.host_addr != from {
            return Err(RoadError::invalid("alive ack from unexpected address"));
        }
        let key: TxKey = (uid, Kind::Alive, Role::Initiator);
        let Some(Progress::Alive { seq }) = self.registry.get(&key).map(|tx| tx.progress.clone())
        else {
            return Err(RoadError::invalid("unsolicited alive ack"));
        };
        let session = remote
            .session
            .as_ref()
            .ok_or_else(|| RoadError::invalid("alive ack without session"))?;
        let plain = self.crypto.open(&session.secret, &session.peer, probe)?;
        let echoed = decode_probe(plain, ACK_TAG, packet.header)?;
        if echoed != seq {
            return Err(RoadError::invalid("stale alive ack"));
        }

        let Some(tx) = self.registry.remove(&key) else {
            return Ok(());
        };
        if let Some(remote) = self.remotes.get_mut(&uid) {
            let was_alive = remote.alived().is_true();
            remote.mark_alive(now);
            tracing::debug!("alive: {:?} ({uid}) answered probe {seq}", remote.name);
            if !was_alive {
                fx.push(Effect::Emit(StackEvent::Alived { uid }));
            }
        }
        self.succeed(tx, now, fx);
        Ok(())
    }
}
