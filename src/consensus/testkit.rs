//! Deterministic in-memory cluster for protocol tests. Messages sit in one
//! global queue until a test delivers them, and round timers only fire on
//! request.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::common::config::AgreementConfig;
use crate::common::crypto::Keypair;
use crate::common::timer::ManualTimer;
use crate::network::Transport;
use super::{
    Agreement, AgreementListener, Collaborators, FreezeProof, InstanceId, KeyRing, MessageKind,
    ParticipantId, Participant, PaxosMessage, Proposal, SignedProposal,
};

#[derive(Clone, Debug)]
pub struct Envelope {
    pub target: ParticipantId,
    pub message: PaxosMessage,
}

/// Queues every send and keeps a log of all of them.
#[derive(Default)]
pub struct Wire {
    queue: Mutex<VecDeque<Envelope>>,
    log: Mutex<Vec<Envelope>>,
}

impl Transport for Wire {
    fn send(&self, target: &ParticipantId, message: PaxosMessage) {
        let envelope = Envelope {
            target: target.clone(),
            message,
        };
        self.log.lock().unwrap().push(envelope.clone());
        self.queue.lock().unwrap().push_back(envelope);
    }
}

pub fn keypair(id: &str) -> Keypair {
    let mut seed = [7u8; 32];
    for (slot, byte) in seed.iter_mut().zip(id.bytes()) {
        *slot = byte;
    }
    Keypair::from_seed(seed)
}

/// A round 0 Propose from `initiator`, signed with its simulation key.
pub fn signed_propose(instance_id: &InstanceId, initiator: &str, value: &str) -> PaxosMessage {
    let initiator = ParticipantId::from(initiator);
    let signed = SignedProposal::sign(instance_id, &initiator, value.into(), &keypair(initiator.as_str()));
    PaxosMessage::new(
        MessageKind::Propose(signed.sig),
        instance_id.clone(),
        initiator.clone(),
        initiator,
        0,
        value.into(),
    )
}

pub struct Simulation {
    pub wire: Arc<Wire>,
    pub timer: Arc<ManualTimer>,
    pub nodes: BTreeMap<ParticipantId, Participant>,
    pub ids: Vec<ParticipantId>,
    agreements: UnboundedReceiver<Agreement>,
}

impl Simulation {
    pub fn new(ids: &[&str]) -> Self {
        Self::with_faulty(ids, &[])
    }

    /// All of `ids` are participants, but only the ones not in `faulty` run
    /// the protocol. Messages to faulty ones are dropped.
    pub fn with_faulty(ids: &[&str], faulty: &[&str]) -> Self {
        let all: Vec<ParticipantId> = ids.iter().map(|id| ParticipantId::from(*id)).collect();
        let keyring: KeyRing = ids
            .iter()
            .map(|id| (ParticipantId::from(*id), keypair(id).pubkey()))
            .collect();
        let verifier = Arc::new(keyring);
        let wire = Arc::new(Wire::default());
        let timer = Arc::new(ManualTimer::new());
        let (agreement_tx, agreements) = mpsc::unbounded_channel();
        let listener: Arc<dyn AgreementListener> = Arc::new(agreement_tx);

        let nodes = ids
            .iter()
            .filter(|id| !faulty.contains(*id))
            .map(|id| {
                let participant = Participant::new(
                    (*id).into(),
                    keypair(id),
                    all.clone(),
                    AgreementConfig::default(),
                    Collaborators {
                        transport: wire.clone(),
                        timer: timer.clone(),
                        verifier: verifier.clone(),
                        listener: listener.clone(),
                    },
                )
                .unwrap();
                (ParticipantId::from(*id), participant)
            })
            .collect();

        Simulation {
            wire,
            timer,
            nodes,
            ids: all,
            agreements,
        }
    }

    pub fn node(&self, id: &str) -> &Participant {
        &self.nodes[&ParticipantId::from(id)]
    }

    pub fn deliver(&self, envelope: Envelope) {
        if let Some(node) = self.nodes.get(&envelope.target) {
            node.handle(envelope.message);
        }
    }

    /// Messages sent but not yet delivered, in send order.
    pub fn queued(&self) -> Vec<Envelope> {
        self.wire.queue.lock().unwrap().iter().cloned().collect()
    }

    pub fn pending(&self) -> usize {
        self.wire.queue.lock().unwrap().len()
    }

    /// Delivers in send order until the queue drains.
    pub fn deliver_all(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.wire.queue.lock().unwrap().pop_front();
            let Some(envelope) = next else {
                return delivered;
            };
            self.deliver(envelope);
            delivered += 1;
            assert!(delivered < 1_000_000, "message storm");
        }
    }

    /// Delivers only queued messages matching `pred`, including ones sent
    /// while doing so. Everything else stays queued in order.
    pub fn deliver_where(&self, pred: impl Fn(&Envelope) -> bool) -> usize {
        let mut delivered = 0;
        loop {
            let next = {
                let mut queue = self.wire.queue.lock().unwrap();
                let pos = queue.iter().position(&pred);
                pos.and_then(|pos| queue.remove(pos))
            };
            let Some(envelope) = next else {
                return delivered;
            };
            self.deliver(envelope);
            delivered += 1;
        }
    }

    /// Delivers one queued message picked at random.
    pub fn deliver_random(&self, rng: &mut StdRng) -> bool {
        let next = {
            let mut queue = self.wire.queue.lock().unwrap();
            if queue.is_empty() {
                return false;
            }
            let pos = rng.gen_range(0..queue.len());
            queue.remove(pos)
        };
        if let Some(envelope) = next {
            self.deliver(envelope);
        }
        true
    }

    pub fn fire_timers(&self) -> usize {
        self.timer.fire_all()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.wire.log.lock().unwrap().clone()
    }

    /// Freeze proofs for one frozen round that were sent to `target`.
    pub fn proofs_sent_to(&self, target: &str, initiator: &ParticipantId, round: u64) -> Vec<FreezeProof> {
        let target = ParticipantId::from(target);
        self.wire
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.target == target && e.message.initiator == *initiator && e.message.round == round)
            .filter_map(|e| match &e.message.kind {
                MessageKind::FreezeProof(proof) => Some(proof.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_kind(&self, kind: &str, initiator: &str) -> Vec<Envelope> {
        let initiator = ParticipantId::from(initiator);
        self.sent()
            .into_iter()
            .filter(|e| e.message.is_kind(kind) && e.message.initiator == initiator)
            .collect()
    }

    /// What every running node decided for one execution.
    pub fn decided(&self, instance_id: &InstanceId, initiator: &str) -> BTreeMap<ParticipantId, Option<Proposal>> {
        let initiator = ParticipantId::from(initiator);
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.decided_value(instance_id, &initiator)))
            .collect()
    }

    pub fn agreements(&mut self) -> Vec<Agreement> {
        let mut agreements = Vec::new();
        while let Ok(agreement) = self.agreements.try_recv() {
            agreements.push(agreement);
        }
        agreements
    }
}
