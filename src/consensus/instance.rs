use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;

use crate::common::lock;
use super::execution::{PaxosExecution, RoundTimers};
use super::message::{InstanceId, ParticipantId, Proposal};
use super::peers::Peers;
use super::quorum::Quorum;

/// The outcome of an instance: the value decided for every initiator, as
/// observed by one participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Agreement {
    pub instance_id: InstanceId,
    pub observer: ParticipantId,
    pub decisions: BTreeMap<ParticipantId, Proposal>,
}

impl Agreement {
    /// Number of initiators whose execution produced a real value.
    pub fn contributions(&self) -> usize {
        self.decisions.values().filter(|v| !v.is_null()).count()
    }

    /// Whether enough initiators contributed for the outcome to be used.
    pub fn meets_two_thirds(&self, quorum: Quorum) -> bool {
        self.contributions() >= quorum.two_thirds()
    }
}

/// Receives each instance's agreement once all of its executions decided.
pub trait AgreementListener: Send + Sync {
    fn notify_agreement(&self, agreement: Agreement);
}

impl AgreementListener for UnboundedSender<Agreement> {
    fn notify_agreement(&self, agreement: Agreement) {
        if self.send(agreement).is_err() {
            tracing::warn!("agreement listener dropped, discarding agreement");
        }
    }
}

/// All executions of one agreement instance, one per participant acting
/// as initiator. The participant set is fixed when the instance opens.
pub struct PaxosInstance {
    id: InstanceId,
    leaders: Arc<Peers>,
    executions: BTreeMap<ParticipantId, Mutex<PaxosExecution>>,
    decisions: Mutex<BTreeMap<ParticipantId, Proposal>>,
    notified: AtomicBool,
}

impl PaxosInstance {
    pub fn new(id: InstanceId, participants: Peers, timers: &dyn RoundTimers) -> Self {
        let leaders = Arc::new(participants);
        let executions = leaders
            .members()
            .iter()
            .map(|initiator| {
                let exec = PaxosExecution::new(id.clone(), initiator.clone(), leaders.clone(), timers);
                (initiator.clone(), Mutex::new(exec))
            })
            .collect();

        PaxosInstance {
            id,
            leaders,
            executions,
            decisions: Mutex::new(BTreeMap::new()),
            notified: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn participants(&self) -> &Peers {
        &self.leaders
    }

    /// Locks the execution started by `initiator`.
    pub fn execution(&self, initiator: &ParticipantId) -> Option<MutexGuard<'_, PaxosExecution>> {
        self.executions.get(initiator).map(lock)
    }

    /// Records an execution's decision. Returns the full agreement the first
    /// time every execution has decided.
    pub fn record_decision(
        &self,
        observer: &ParticipantId,
        initiator: &ParticipantId,
        value: &Proposal,
    ) -> Option<Agreement> {
        let mut decisions = lock(&self.decisions);
        decisions
            .entry(initiator.clone())
            .or_insert_with(|| value.clone());

        if decisions.len() < self.executions.len() {
            return None;
        }
        if self.notified.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Agreement {
            instance_id: self.id.clone(),
            observer: observer.clone(),
            decisions: decisions.clone(),
        })
    }

    /// Aborts every round of every execution.
    pub fn cancel(&self) {
        for execution in self.executions.values() {
            lock(execution).cancel();
        }
    }
}
