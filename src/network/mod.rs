pub mod channel;
pub mod node;

use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::common::error::AgreementError;
use crate::consensus::{ParticipantId, PaxosMessage, Peers, Quorum};

pub use channel::ChannelTransport;
pub use node::LocalCluster;

/*
    Links are point-to-point, authenticated and reliable between correct
    participants. A multicast is the sender delivering the same message to
    every known participant, itself included. The protocol stays safe under
    arbitrary delays; it only needs timely delivery to make progress.
*/

/// Delivers a message to one participant.
pub trait Transport: Send + Sync {
    fn send(&self, target: &ParticipantId, message: PaxosMessage);
}

/// Fan-out over a transport for one participant.
pub struct MessageFabric {
    me: ParticipantId,
    peers: RwLock<Peers>,
    transport: Arc<dyn Transport>,
}

impl MessageFabric {
    pub fn new(me: ParticipantId, peers: Peers, transport: Arc<dyn Transport>) -> Result<Self, AgreementError> {
        if peers.is_empty() {
            return Err(AgreementError::NoParticipants);
        }
        if !peers.is_member(&me) {
            return Err(AgreementError::NotAParticipant(me));
        }
        Ok(MessageFabric {
            me,
            peers: RwLock::new(peers),
            transport,
        })
    }

    pub fn me(&self) -> &ParticipantId {
        &self.me
    }

    /// Snapshot of the current participant set.
    pub fn peers(&self) -> Peers {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn quorum(&self) -> Quorum {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).quorum()
    }

    pub fn is_member(&self, id: &ParticipantId) -> bool {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).is_member(id)
    }

    /// Registers a newly discovered participant. Returns false if it was known.
    pub fn add_participant(&self, id: ParticipantId) -> bool {
        self.peers.write().unwrap_or_else(PoisonError::into_inner).add(id)
    }

    /// Sends `message` to every participant, including this one.
    pub fn multicast(&self, message: PaxosMessage) {
        let targets = self.peers();
        trace!(%message, targets = targets.len(), "multicast");
        for target in targets.members() {
            self.transport.send(target, message.clone());
        }
    }

    pub fn send_to(&self, target: &ParticipantId, message: PaxosMessage) {
        trace!(%message, %target, "send");
        self.transport.send(target, message);
    }
}
