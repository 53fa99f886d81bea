//! Join: admission and uid binding.
//!
//! Request → Accept → Ack. Only a main stack accepts. The correspondent
//! marks `joined` when the ack arrives and redoes its accept until then.

use crate::packet::{Body, Header, Identity, Packet};
use crate::stack::state::StackState;
use crate::stack::StackEvent;
use crate::types::{AutoMode, HostAddr, Kind, NackReason, Role, Tristate, Uid};
use crate::RoadError;

use super::{Effect, Progress};

impl StackState {
    pub(crate) fn join_begin(
        &mut self,
        uid: Uid,
        goal: Kind,
        renewed: bool,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let header = self.header_for(uid)?;
        let packet = self.sign(
            header,
            Body::JoinRequest {
                identity: self.local.identity(),
            },
        )?;
        if header.dest == 0 {
            tracing::info!("join: vacuous join with remote {uid}");
        } else {
            tracing::info!("join: rejoin with remote {uid} (far uid {})", header.dest);
        }
        self.open(Kind::Join, Role::Initiator, uid, goal, renewed, Progress::Join, packet, now, fx);
        Ok(())
    }

    /// Find the remote an inbound join request refers to: by uid, then by
    /// name, then a keyless placeholder at the sender's address.
    fn locate_joiner(&self, header: Header, identity: &Identity, from: HostAddr) -> Option<Uid> {
        if header.dest != 0 && self.remotes.contains_key(&header.dest) {
            return Some(header.dest);
        }
        if let Some(uid) = self.uid_by_name(&identity.name) {
            return Some(uid);
        }
        self.uid_by_addr(&from)
            .filter(|uid| self.remotes.get(uid).is_some_and(|r| r.verify_key.is_none()))
    }

    /// Correspondent: a peer asks to join.
    pub(crate) fn on_join_request(
        &mut self,
        from: HostAddr,
        packet: &Packet,
        identity: &Identity,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        // Self-asserted: the request is signed by the key it declares
        packet.verify(&identity.verify_key, self.crypto.as_ref())?;
        let header = packet.header;
        let known = self.locate_joiner(header, identity, from);

        if !self.local.main {
            tracing::info!("join: refusing {:?} from {from}, not main", identity.name);
            return self.nack(from, header, known, Kind::Join, NackReason::Refused, fx);
        }

        let accept = match known {
            Some(uid) => {
                let same_keys = self.remotes.get(&uid).is_some_and(|r| {
                    r.verify_key.is_none()
                        || (r.verify_key == Some(identity.verify_key)
                            && r.public_key == Some(identity.public_key))
                });
                same_keys || self.local.auto == AutoMode::Always
            }
            None => match self.local.auto {
                AutoMode::Never => false,
                AutoMode::Once => {
                    tracing::info!("join: auto-accept once used by {:?}", identity.name);
                    self.local.auto = AutoMode::Never;
                    fx.push(Effect::PersistLocal);
                    true
                }
                AutoMode::Always => true,
            },
        };
        if !accept {
            tracing::info!(
                "join: refusing {:?} from {from} (auto {})",
                identity.name,
                self.local.auto
            );
            return self.nack(from, header, known, Kind::Join, NackReason::Refused, fx);
        }

        let uid = match known {
            Some(uid) => uid,
            None => self.create_remote(identity.name.clone(), from, now)?,
        };
        self.relabel(uid, &identity.name, from);
        if let Some(remote) = self.remotes.get_mut(&uid) {
            remote.far_uid = header.source;
            if remote.install_keys(identity.verify_key, identity.public_key) {
                tracing::info!("join: {:?} ({uid}) presented new keys", identity.name);
            }
        }
        fx.push(Effect::PersistRemote(uid));

        let reply = self.sign(
            self.header_for(uid)?,
            Body::JoinAccept {
                identity: self.local.identity(),
                assigned: uid,
            },
        )?;
        let key = (uid, Kind::Join, Role::Correspondent);
        if self.registry.contains(&key) {
            self.advance(&key, Progress::Join, reply, now, fx);
        } else {
            tracing::debug!("join: accepting {:?} as {uid}", identity.name);
            self.open(Kind::Join, Role::Correspondent, uid, Kind::Join, false, Progress::Join, reply, now, fx);
        }
        Ok(())
    }

    /// Initiator: the main accepted us.
    pub(crate) fn on_join_accept(
        &mut self,
        from: HostAddr,
        packet: &Packet,
        identity: &Identity,
        assigned: Uid,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let header = packet.header;
        let uid = header.dest;
        let remote = self.remotes.get(&uid).ok_or(RoadError::UnknownRemote(uid))?;
        packet.verify(&identity.verify_key, self.crypto.as_ref())?;

        let key = (uid, Kind::Join, Role::Initiator);
        if !self.registry.contains(&key) {
            // Our ack got lost; the correspondent is still redoing its accept
            if remote.joined().is_true()
                && remote.far_uid == header.source
                && remote.verify_key == Some(identity.verify_key)
            {
                let ack = self.sign(self.header_for(uid)?, Body::JoinAck)?;
                fx.push(Effect::Send { to: from, packet: ack });
                return Ok(());
            }
            return Err(RoadError::invalid("unsolicited join accept"));
        }

        let rekeyed = remote
            .verify_key
            .is_some_and(|vk| vk != identity.verify_key);
        if rekeyed && self.local.auto != AutoMode::Always {
            if let Some(tx) = self.registry.remove(&key) {
                tracing::warn!("join: {:?} ({uid}) answered with different keys", identity.name);
                self.fail(tx, NackReason::Invalid, fx);
            }
            return Ok(());
        }

        let Some(tx) = self.registry.remove(&key) else {
            return Ok(());
        };
        self.relabel(uid, &identity.name, from);
        let Some(remote) = self.remotes.get_mut(&uid) else {
            return Ok(());
        };
        remote.far_uid = header.source;
        remote.install_keys(identity.verify_key, identity.public_key);
        remote.set_joined(Tristate::True);
        let far_uid = remote.far_uid;
        fx.push(Effect::PersistRemote(uid));

        if self.local.uid == 0 {
            tracing::info!("join: adopting uid {assigned} from {:?}", identity.name);
            self.local.uid = assigned;
            fx.push(Effect::PersistLocal);
        }

        let ack = self.sign(self.header_for(uid)?, Body::JoinAck)?;
        fx.push(Effect::Send { to: from, packet: ack });
        fx.push(Effect::Emit(StackEvent::Joined { uid }));
        tracing::info!("join: joined {:?} ({uid}, far uid {far_uid})", identity.name);
        self.succeed(tx, now, fx);
        Ok(())
    }

    /// Correspondent: the initiator confirmed our accept.
    pub(crate) fn on_join_ack(
        &mut self,
        packet: &Packet,
        now: u64,
        fx: &mut Vec<Effect>,
    ) -> Result<(), RoadError> {
        let header = packet.header;
        let uid = header.dest;
        let remote = self.remotes.get(&uid).ok_or(RoadError::UnknownRemote(uid))?;
        if remote.far_uid != header.source {
            return Err(RoadError::invalid("join ack source mismatch"));
        }
        let vk = remote
            .verify_key
            .ok_or_else(|| RoadError::invalid("join ack before identity"))?;
        packet.verify(&vk, self.crypto.as_ref())?;

        let tx = self
            .registry
            .remove(&(uid, Kind::Join, Role::Correspondent))
            .ok_or_else(|| RoadError::invalid("join ack without pending accept"))?;
        if let Some(remote) = self.remotes.get_mut(&uid) {
            remote.set_joined(Tristate::True);
            tracing::info!("join: {:?} ({uid}) joined us", remote.name);
        }
        fx.push(Effect::PersistRemote(uid));
        fx.push(Effect::Emit(StackEvent::Joined { uid }));
        self.succeed(tx, now, fx);
        Ok(())
    }
}
