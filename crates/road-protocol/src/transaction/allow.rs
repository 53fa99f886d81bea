//! Allow: ephemeral session establishment over a joined relationship.
//!
//! Hello → Cookie → Initiate → Ack, every packet signed with the long-term
//! identity. Both ends finish with (own ephemeral secret, peer ephemeral
//! public) as their session.

use crate::crypto::Sealed;
use crate::estate::Session;
use crate::packet::{Body, Packet};
use crate::stack::state::StackState;
use crate::stack::StackEvent;
use crate::types::{HostAddr, Kind, NackReason, Role, Uid};
use crate::RoadError;

use super::{Effect, Progress, TxKey};

impl StackState {
    pub(crate) fn allow_begin(
        &mut self,
        uid: Uid,
        goal: Kind,
        renewed: bool,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let public_key = self
            .remotes
            .get(&uid)
            .and_then(|r| r.public_key)
            .ok_or_else(|| RoadError::invalid("allow without peer public key"))?;

        let ephemeral = self.crypto.box_keypair();
        let challenge = self.crypto.challenge();
        let sealed = self.crypto.seal(ephemeral.secret(), &public_key, &challenge)?;
        let packet = self.sign(
            self.header_for(uid)?,
            Body::AllowHello {
                ephemeral: ephemeral.public(),
                challenge: sealed,
            },
        )?;
        tracing::debug!("allow: hello to remote {uid}");
        self.open(
            Kind::Allow,
            Role::Initiator,
            uid,
            goal,
            renewed,
            Progress::AllowHello {
                ephemeral,
                challenge,
            },
            packet,
            now,
            fx,
        );
        Ok(())
    }

    /// Validate an inbound allow packet against its remote: the remote must
    /// exist, the source must match the far uid and the signature must hold.
    fn allow_peer(&self, packet: &Packet) -> Result<Uid, RoadError> {
        let uid = packet.header.dest;
        let remote = self.remotes.get(&uid).ok_or(RoadError::UnknownRemote(uid))?;
        if remote.far_uid != packet.header.source {
            return Err(RoadError::invalid("allow source mismatch"));
        }
        let vk = remote
            .verify_key
            .ok_or_else(|| RoadError::invalid("allow from keyless remote"))?;
        packet.verify(&vk, self.crypto.as_ref())?;
        Ok(uid)
    }

    /// Correspondent: a hello opens (or restarts) an allow.
    pub(crate) fn on_allow_hello(
        &mut self,
        from: HostAddr,
        packet: &Packet,
        ephemeral: [u8; 32],
        challenge: &Sealed,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let header = packet.header;
        let uid = header.dest;
        let Some(remote) = self.remotes.get(&uid) else {
            return self.nack(from, header, None, Kind::Allow, NackReason::Unjoined, fx);
        };
        if remote.far_uid != header.source {
            return Err(RoadError::invalid("allow source mismatch"));
        }
        if !remote.joined().is_true() {
            return self.nack(from, header, Some(uid), Kind::Allow, NackReason::Unjoined, fx);
        }
        self.allow_peer(packet)?;
        let peer_vk = remote
            .verify_key
            .ok_or_else(|| RoadError::invalid("allow from keyless remote"))?;

        // Crossing hellos: the smaller verify key keeps initiating
        let mut goal = Kind::Allow;
        let ours: TxKey = (uid, Kind::Allow, Role::Initiator);
        if self.registry.contains(&ours) {
            if self.local.verify_key() < peer_vk {
                tracing::debug!("allow: crossing hello from {uid}, keeping our initiator");
                return Ok(());
            }
            if let Some(tx) = self.registry.remove(&ours) {
                tracing::debug!("allow: crossing hello from {uid}, yielding");
                goal = goal.max(tx.goal);
            }
        }

        let challenge = match self
            .crypto
            .open(self.local.boxer.secret(), &ephemeral, challenge)
            .map(<[u8; 32]>::try_from)
        {
            Ok(Ok(challenge)) => challenge,
            _ => return self.nack(from, header, Some(uid), Kind::Allow, NackReason::Invalid, fx),
        };

        let key: TxKey = (uid, Kind::Allow, Role::Correspondent);
        if let Some(tx) = self.registry.get_mut(&key) {
            if matches!(&tx.progress, Progress::AllowCookie { peer, .. } if *peer == ephemeral) {
                tx.goal = tx.goal.max(goal);
                self.resend(&key, fx);
                return Ok(());
            }
        }

        let own = self.crypto.box_keypair();
        let counter = self.crypto.challenge();
        let mut plain = Vec::with_capacity(64);
        plain.extend_from_slice(&challenge);
        plain.extend_from_slice(&counter);
        let cookie = self.crypto.seal(own.secret(), &ephemeral, &plain)?;
        let reply = self.sign(
            self.header_for(uid)?,
            Body::AllowCookie {
                ephemeral: own.public(),
                cookie,
            },
        )?;
        tracing::debug!("allow: cookie to remote {uid}");
        self.open(
            Kind::Allow,
            Role::Correspondent,
            uid,
            goal,
            false,
            Progress::AllowCookie {
                ephemeral: own,
                peer: ephemeral,
                counter,
            },
            reply,
            now,
            fx,
        );
        Ok(())
    }

    /// Initiator: the cookie proves the correspondent read our challenge.
    pub(crate) fn on_allow_cookie(
        &mut self,
        packet: &Packet,
        ephemeral: [u8; 32],
        cookie: &Sealed,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let uid = self.allow_peer(packet)?;
        let key: TxKey = (uid, Kind::Allow, Role::Initiator);
        let progress = self
            .registry
            .get(&key)
            .map(|tx| tx.progress.clone())
            .ok_or_else(|| RoadError::invalid("unsolicited allow cookie"))?;

        match progress {
            Progress::AllowHello {
                ephemeral: own,
                challenge,
            } => {
                let counter = match self.crypto.open(own.secret(), &ephemeral, cookie) {
                    Ok(plain) if plain.len() == 64 && plain[..32] == challenge[..] => plain[32..].to_vec(),
                    _ => {
                        if let Some(tx) = self.registry.remove(&key) {
                            self.fail(tx, NackReason::Invalid, fx);
                        }
                        return Ok(());
                    }
                };
                let proof = self.crypto.seal(own.secret(), &ephemeral, &counter)?;
                let initiate = self.sign(self.header_for(uid)?, Body::AllowInitiate { proof })?;
                self.advance(
                    &key,
                    Progress::AllowInitiated {
                        ephemeral: own,
                        peer: ephemeral,
                    },
                    initiate,
                    now,
                    fx,
                );
                Ok(())
            }
            // Our initiate got lost; the cookie is a redo
            Progress::AllowInitiated { peer, .. } if peer == ephemeral => {
                self.resend(&key, fx);
                Ok(())
            }
            _ => Err(RoadError::invalid("stale allow cookie")),
        }
    }

    /// Correspondent: the initiate answers our counter-challenge.
    pub(crate) fn on_allow_initiate(
        &mut self,
        from: HostAddr,
        packet: &Packet,
        proof: &Sealed,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let uid = self.allow_peer(packet)?;
        let key: TxKey = (uid, Kind::Allow, Role::Correspondent);
        let progress = self.registry.get(&key).map(|tx| tx.progress.clone());

        let Some(Progress::AllowCookie {
            ephemeral,
            peer,
            counter,
        }) = progress
        else {
            // Our ack got lost: re-ack if the proof opens under the session
            let session = self.remotes.get(&uid).and_then(|r| r.session.as_ref());
            if let Some(session) = session {
                if self.crypto.open(&session.secret, &session.peer, proof).is_ok() {
                    let ack = self.sign(self.header_for(uid)?, Body::AllowAck)?;
                    fx.push(Effect::Send { to: from, packet: ack });
                    return Ok(());
                }
            }
            return Err(RoadError::invalid("allow initiate without pending cookie"));
        };

        match self.crypto.open(ephemeral.secret(), &peer, proof) {
            Ok(plain) if plain[..] == counter[..] => {}
            _ => {
                if let Some(tx) = self.registry.remove(&key) {
                    self.fail(tx, NackReason::Invalid, fx);
                }
                return Err(RoadError::invalid("allow initiate proof mismatch"));
            }
        }

        let Some(mut tx) = self.registry.remove(&key) else {
            return Ok(());
        };
        let established = self
            .remotes
            .get_mut(&uid)
            .is_some_and(|r| r.establish(Session::new(&ephemeral, peer)));
        if !established {
            self.fail(tx, NackReason::Unjoined, fx);
            return Ok(());
        }

        let ack = self.sign(self.header_for(uid)?, Body::AllowAck)?;
        fx.push(Effect::Send { to: from, packet: ack });
        fx.push(Effect::Emit(StackEvent::Allowed { uid }));
        tracing::info!("allow: remote {uid} allowed (correspondent)");

        // Any initiator of ours towards the same remote is now redundant
        if let Some(ours) = self.registry.remove(&(uid, Kind::Allow, Role::Initiator)) {
            tx.goal = tx.goal.max(ours.goal);
            tx.renewed |= ours.renewed;
        }
        self.succeed(tx, now, fx);
        Ok(())
    }

    /// Initiator: the correspondent installed its session.
    pub(crate) fn on_allow_ack(
        &mut self,
        packet: &Packet,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let uid = self.allow_peer(packet)?;
        let key: TxKey = (uid, Kind::Allow, Role::Initiator);
        let Some(Progress::AllowInitiated { ephemeral, peer }) =
            self.registry.get(&key).map(|tx| tx.progress.clone())
        else {
            return Err(RoadError::invalid("unsolicited allow ack"));
        };

        let Some(tx) = self.registry.remove(&key) else {
            return Ok(());
        };
        let established = self
            .remotes
            .get_mut(&uid)
            .is_some_and(|r| r.establish(Session::new(&ephemeral, peer)));
        if !established {
            self.fail(tx, NackReason::Unjoined, fx);
            return Ok(());
        }

        fx.push(Effect::Emit(StackEvent::Allowed { uid }));
        tracing::info!("allow: remote {uid} allowed");
        self.succeed(tx, now, fx);
        Ok(())
    }
}
