use std::sync::{Arc, Weak};

use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, warn};

use crate::common::config::AgreementConfig;
use crate::common::crypto::Keypair;
use crate::common::error::{AgreementError, RouteError};
use crate::common::timer::{Timer, TimerHandle};
use crate::network::{MessageFabric, Transport};
use super::acceptor::{Acceptor, Outbound};
use super::execution::{PaxosExecution, RoundTimers};
use super::instance::{AgreementListener, PaxosInstance};
use super::message::{InstanceId, MessageKind, ParticipantId, PaxosMessage, Proposal};
use super::peers::Peers;
use super::proof::{SignatureVerifier, SignedProposal};
use super::quorum::Quorum;
use super::store::Store;

/// Everything a participant talks to outside its own state.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub timer: Arc<dyn Timer>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub listener: Arc<dyn AgreementListener>,
}

/// One directory node running the agreement. Cheap to clone; clones share
/// all state.
#[derive(Clone)]
pub struct Participant {
    inner: Arc<Inner>,
}

struct Inner {
    keypair: Keypair,
    config: AgreementConfig,
    fabric: MessageFabric,
    store: Store,
    timer: Arc<dyn Timer>,
    verifier: Arc<dyn SignatureVerifier>,
    listener: Arc<dyn AgreementListener>,
}

/// Arms round timeouts that call back into the participant, if it still
/// exists when they fire.
struct InstanceTimers {
    participant: Weak<Inner>,
    instance_id: InstanceId,
}

impl RoundTimers for InstanceTimers {
    fn arm(&self, initiator: &ParticipantId, round: u64) -> Option<TimerHandle> {
        let inner = self.participant.upgrade()?;
        let participant = self.participant.clone();
        let instance_id = self.instance_id.clone();
        let initiator = initiator.clone();
        let after = inner.config.round_timeout(round);
        Some(inner.timer.arm(
            after,
            Box::new(move || {
                if let Some(inner) = participant.upgrade() {
                    Participant { inner }.on_timeout(&instance_id, &initiator, round);
                }
            }),
        ))
    }
}

impl Participant {
    pub fn new(
        id: ParticipantId,
        keypair: Keypair,
        participants: impl IntoIterator<Item = ParticipantId>,
        config: AgreementConfig,
        collaborators: Collaborators,
    ) -> Result<Self, AgreementError> {
        let fabric = MessageFabric::new(id, Peers::new(participants), collaborators.transport)?;
        Ok(Participant {
            inner: Arc::new(Inner {
                keypair,
                config,
                fabric,
                store: Store::new(),
                timer: collaborators.timer,
                verifier: collaborators.verifier,
                listener: collaborators.listener,
            }),
        })
    }

    pub fn id(&self) -> &ParticipantId {
        self.inner.fabric.me()
    }

    pub fn quorum(&self) -> Quorum {
        self.inner.fabric.quorum()
    }

    pub fn peers(&self) -> Peers {
        self.inner.fabric.peers()
    }

    /// Opens an instance with the current participant set. Returns false if
    /// it was already open.
    pub fn start_instance(&self, instance_id: &InstanceId) -> bool {
        self.open_instance(instance_id).1
    }

    /// Opens the instance if needed and multicasts this participant's value
    /// for its own execution.
    pub fn propose(&self, instance_id: &InstanceId, value: Proposal) {
        self.open_instance(instance_id);
        info!(instance = %instance_id, %value, "proposing");
        let me = self.id().clone();
        let signed = SignedProposal::sign(instance_id, &me, value.clone(), &self.inner.keypair);
        self.inner.fabric.multicast(PaxosMessage::new(
            MessageKind::Propose(signed.sig),
            instance_id.clone(),
            me.clone(),
            me,
            0,
            value,
        ));
    }

    /// Applies one inbound message.
    pub fn handle(&self, message: PaxosMessage) {
        debug!(%message, "received");
        let instance = match self.route(&message) {
            Ok(instance) => instance,
            Err(err) => {
                error!(%message, "dropping message: {err}");
                return;
            }
        };

        // the instance keeps the member set it was opened with
        let quorum = instance.participants().quorum();
        let timers = self.timers(instance.id());
        let mut acceptor = Acceptor::new(self.id(), quorum, &self.inner.keypair, &*self.inner.verifier, &timers);
        let newly_decided = {
            let Some(mut exec) = instance.execution(&message.initiator) else {
                let err = RouteError::UnknownInitiator {
                    instance: message.instance_id.clone(),
                    initiator: message.initiator.clone(),
                };
                warn!(%message, "dropping message: {err}");
                return;
            };
            let was_decided = exec.is_decided();
            acceptor.handle(&mut exec, &message);
            if was_decided {
                None
            } else {
                exec.decided_value().cloned()
            }
        };

        self.flush(acceptor.into_outbox());
        if let Some(value) = newly_decided {
            self.record_decision(&instance, &message.initiator, &value);
        }
    }

    /// Pulls messages off `inbox` until it closes.
    pub async fn run(&self, mut inbox: Receiver<PaxosMessage>) {
        info!(participant = %self.id(), "running participant");
        while let Some(message) = inbox.recv().await {
            self.handle(message);
        }
        info!(participant = %self.id(), "inbox closed, stopping");
    }

    pub fn decided_value(&self, instance_id: &InstanceId, initiator: &ParticipantId) -> Option<Proposal> {
        self.with_execution(instance_id, initiator, |exec| exec.decided_value().cloned())
            .flatten()
    }

    /// Runs `f` against an execution while holding its lock.
    pub fn with_execution<R>(
        &self,
        instance_id: &InstanceId,
        initiator: &ParticipantId,
        f: impl FnOnce(&PaxosExecution) -> R,
    ) -> Option<R> {
        let instance = self.inner.store.get(instance_id)?;
        let exec = instance.execution(initiator)?;
        Some(f(&*exec))
    }

    pub fn instance(&self, instance_id: &InstanceId) -> Option<Arc<PaxosInstance>> {
        self.inner.store.get(instance_id)
    }

    /// Aborts every round of the instance. Late messages are still taken in
    /// but nothing new gets accepted.
    pub fn cancel_instance(&self, instance_id: &InstanceId) -> bool {
        let Some(instance) = self.inner.store.get(instance_id) else {
            return false;
        };
        info!(instance = %instance_id, "cancelling instance");
        instance.cancel();
        true
    }

    /// Forgets the instance after cancelling it. Later messages for it open
    /// a fresh one.
    pub fn remove_instance(&self, instance_id: &InstanceId) -> bool {
        let Some(instance) = self.inner.store.remove(instance_id) else {
            return false;
        };
        info!(instance = %instance_id, "removing instance");
        instance.cancel();
        true
    }

    /// Registers a participant discovered after startup. Only instances
    /// opened from now on include it.
    pub fn add_participant(&self, id: ParticipantId) -> bool {
        let added = self.inner.fabric.add_participant(id.clone());
        if added {
            info!(participant = %id, n = self.quorum().n(), "participant added");
        }
        added
    }

    fn open_instance(&self, instance_id: &InstanceId) -> (Arc<PaxosInstance>, bool) {
        let timers = self.timers(instance_id);
        let (instance, created) = self.inner.store.get_or_insert_with(instance_id, || {
            PaxosInstance::new(instance_id.clone(), self.inner.fabric.peers(), &timers)
        });
        if created {
            info!(instance = %instance_id, n = instance.participants().len(), "opened instance");
        }
        (instance, created)
    }

    fn route(&self, message: &PaxosMessage) -> Result<Arc<PaxosInstance>, RouteError> {
        if let Some(instance) = self.inner.store.get(&message.instance_id) {
            if !instance.participants().is_member(&message.sender) {
                return Err(RouteError::UnknownSender(message.sender.clone()));
            }
            return Ok(instance);
        }
        if !self.inner.fabric.is_member(&message.sender) {
            return Err(RouteError::UnknownInstance(
                message.instance_id.clone(),
                message.sender.clone(),
            ));
        }
        Ok(self.open_instance(&message.instance_id).0)
    }

    fn on_timeout(&self, instance_id: &InstanceId, initiator: &ParticipantId, round: u64) {
        let Some(instance) = self.inner.store.get(instance_id) else {
            debug!(instance = %instance_id, "timeout for a removed instance");
            return;
        };
        let timers = self.timers(instance_id);
        let mut acceptor = Acceptor::new(
            self.id(),
            instance.participants().quorum(),
            &self.inner.keypair,
            &*self.inner.verifier,
            &timers,
        );
        {
            let Some(mut exec) = instance.execution(initiator) else {
                return;
            };
            acceptor.timeout(&mut exec, round);
        }
        self.flush(acceptor.into_outbox());
    }

    fn record_decision(&self, instance: &PaxosInstance, initiator: &ParticipantId, value: &Proposal) {
        if let Some(agreement) = instance.record_decision(self.id(), initiator, value) {
            info!(
                instance = %agreement.instance_id,
                contributions = agreement.contributions(),
                "all executions decided"
            );
            self.inner.listener.notify_agreement(agreement);
        }
    }

    fn flush(&self, outbox: Vec<Outbound>) {
        for outbound in outbox {
            match outbound {
                Outbound::Multicast(message) => self.inner.fabric.multicast(message),
                Outbound::SendTo(target, message) => self.inner.fabric.send_to(&target, message),
            }
        }
    }

    fn timers(&self, instance_id: &InstanceId) -> InstanceTimers {
        InstanceTimers {
            participant: Arc::downgrade(&self.inner),
            instance_id: instance_id.clone(),
        }
    }
}
