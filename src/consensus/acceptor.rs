use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::common::crypto::{Keypair, Signature};
use super::execution::{PaxosExecution, RoundTimers};
use super::message::{MessageKind, ParticipantId, PaxosMessage, Proposal};
use super::proof::{FreezeEvidence, FreezeProof, SignatureVerifier, SignedProposal};
use super::quorum::Quorum;
use super::recovery::Recovery;
use super::round::PaxosRound;

/*
    Acceptor rules, applied to one execution under its lock:

    Propose    round 0 only, from the initiator and signed by it.
               Weak-accept it.
    Weak       > decide_weak: decide. > strong: strong-accept.
               > f: weak-accept. All three are checked on every vote.
    Strong     > 2f: decide.
    Decide     > f: decide.
    Freeze     > f: freeze. > 2f: abort, send a freeze proof to the next
               round's leader and enter that round.
    FreezeProof  (next leader only) > 2f proofs: multicast Collect.
    Collect    weak-accept the carried value in the next round, and enter
               it, if the bundled proofs make it good.

    Once the execution decided, only fresh Freeze messages get an answer:
    the decided value, so lagging peers can finish. Deciding drops the
    rounds never entered, and no round is created afterwards.

    Nothing is sent while the execution is locked. Outgoing messages are
    queued in the outbox and flushed by the caller.
*/

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outbound {
    Multicast(PaxosMessage),
    SendTo(ParticipantId, PaxosMessage),
}

pub(crate) struct Acceptor<'a> {
    me: &'a ParticipantId,
    quorum: Quorum,
    keypair: &'a Keypair,
    verifier: &'a dyn SignatureVerifier,
    timers: &'a dyn RoundTimers,
    outbox: Vec<Outbound>,
}

impl<'a> Acceptor<'a> {
    pub fn new(
        me: &'a ParticipantId,
        quorum: Quorum,
        keypair: &'a Keypair,
        verifier: &'a dyn SignatureVerifier,
        timers: &'a dyn RoundTimers,
    ) -> Self {
        Acceptor {
            me,
            quorum,
            keypair,
            verifier,
            timers,
            outbox: Vec::new(),
        }
    }

    pub fn into_outbox(self) -> Vec<Outbound> {
        self.outbox
    }

    pub fn handle(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage) {
        if let Some(decided) = exec.decided_value().cloned() {
            self.handle_decided(exec, msg, decided);
            return;
        }

        match &msg.kind {
            MessageKind::Propose(sig) => self.on_propose(exec, msg, sig),
            MessageKind::Weak => self.on_weak(exec, msg),
            MessageKind::Strong => self.on_strong(exec, msg),
            MessageKind::Decide => self.on_decide(exec, msg),
            MessageKind::Freeze => self.on_freeze(exec, msg),
            MessageKind::FreezeProof(proof) => self.on_freeze_proof(exec, msg, proof),
            MessageKind::Collect(proofs) => self.on_collect(exec, msg, proofs),
        }
    }

    /// A round timer expired.
    pub fn timeout(&mut self, exec: &mut PaxosExecution, round: u64) {
        if exec.is_decided() || !exec.round(round).is_some_and(PaxosRound::should_freeze_on_timeout) {
            return;
        }
        info!(instance = %exec.instance_id(), initiator = %exec.initiator(), round, "round timed out");
        self.freeze(exec, round);
    }

    fn handle_decided(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage, decided: Proposal) {
        if !matches!(msg.kind, MessageKind::Freeze) {
            debug!(%msg, "execution already decided, ignoring");
            return;
        }
        // no rounds are created any more; freezes are only deduplicated in
        // rounds this participant still keeps
        if let Some(round) = exec.round_mut(msg.round) {
            if !round.add_freeze(&msg.sender) {
                return;
            }
        }
        debug!(%msg, value = %decided, "answering freeze with the decided value");
        let mut answer = msg.reply(MessageKind::Decide, self.me);
        answer.proposal = decided;
        self.multicast(answer);
    }

    fn on_propose(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage, sig: &Signature) {
        if msg.round != 0 {
            warn!(%msg, "propose outside round 0, ignoring");
            return;
        }
        if msg.sender != *exec.initiator() {
            warn!(%msg, "propose not from the initiator, ignoring");
            return;
        }
        let signed = SignedProposal {
            value: msg.proposal.clone(),
            sig: sig.clone(),
        };
        if !self.verifier.is_valid_proposal(&msg.instance_id, &msg.initiator, &signed) {
            warn!(%msg, "propose signature invalid");
            return;
        }
        if !exec.set_original(signed) {
            debug!(%msg, "round already has a proposal");
            return;
        }
        let round = exec.round_or_create(0, self.timers);
        round.add_proposal(&msg.proposal);
        self.weak_accept(round, msg);
    }

    fn on_weak(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage) {
        let quorum = self.quorum;
        let count = {
            let round = exec.round_or_create(msg.round, self.timers);
            if !round.add_weak(&msg.proposal, &msg.sender) {
                return;
            }
            round.weak_count(&msg.proposal)
        };
        debug!(%msg, count, "weak vote");

        if count > quorum.decide_weak() {
            self.decide(exec, msg);
        }

        let Some(round) = exec.round_mut(msg.round) else {
            return;
        };
        if count > quorum.strong() && round.strong_accept(&msg.proposal) {
            info!(instance = %msg.instance_id, initiator = %msg.initiator, round = msg.round, value = %msg.proposal, "strong-accepted");
            self.multicast(msg.reply(MessageKind::Strong, self.me));
        }
        if quorum.exceeds_faulty(count) {
            self.weak_accept(round, msg);
        }
    }

    fn on_strong(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage) {
        let round = exec.round_or_create(msg.round, self.timers);
        if !round.add_strong(&msg.proposal, &msg.sender) {
            return;
        }
        let count = round.strong_count(&msg.proposal);
        debug!(%msg, count, "strong vote");
        if count > self.quorum.decide_strong() {
            self.decide(exec, msg);
        }
    }

    fn on_decide(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage) {
        let round = exec.round_or_create(msg.round, self.timers);
        if !round.add_decide(&msg.proposal, &msg.sender) {
            return;
        }
        let count = round.decide_count(&msg.proposal);
        debug!(%msg, count, "decide vote");
        if self.quorum.exceeds_faulty(count) {
            self.decide(exec, msg);
        }
    }

    fn on_freeze(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage) {
        let quorum = self.quorum;
        let round = exec.round_or_create(msg.round, self.timers);
        if !round.add_freeze(&msg.sender) {
            return;
        }
        let count = round.freeze_count();
        let frozen = round.is_frozen();
        debug!(%msg, count, "freeze vote");

        if quorum.exceeds_faulty(count) && !frozen {
            self.freeze(exec, msg.round);
        }
        if !quorum.exceeds_twice_faulty(count) {
            return;
        }

        let history = exec.history(msg.round);
        let original = exec.original_proposal().cloned();
        let Some(round) = exec.round_mut(msg.round) else {
            return;
        };
        if !round.is_frozen() || round.is_aborted() {
            return;
        }
        let Some(next) = msg.round.checked_add(1) else {
            warn!(%msg, "no round after this one, cannot hand over");
            return;
        };
        round.abort();
        let evidence = FreezeEvidence {
            instance_id: msg.instance_id.clone(),
            initiator: msg.initiator.clone(),
            sender: self.me.clone(),
            round: msg.round,
            weak_value: round.weak_accepted().cloned(),
            strong_value: round.strong_accepted().cloned(),
            history,
            original,
        };
        let header = evidence.weak_value.clone().unwrap_or_else(Proposal::null);
        let proof = evidence.sign(self.keypair);

        let leader = exec.enter(next, self.timers).leader().clone();
        info!(instance = %msg.instance_id, initiator = %msg.initiator, round = msg.round, %leader, "round aborted, sending freeze proof");
        let message = PaxosMessage::new(
            MessageKind::FreezeProof(proof),
            msg.instance_id.clone(),
            msg.initiator.clone(),
            self.me.clone(),
            msg.round,
            header,
        );
        self.outbox.push(Outbound::SendTo(leader, message));
    }

    fn on_freeze_proof(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage, proof: &FreezeProof) {
        let Some(next) = msg.round.checked_add(1) else {
            warn!(%msg, "freeze proof for the last possible round");
            return;
        };
        if exec.leader_of(next) != *self.me {
            debug!(%msg, "not the next leader, ignoring freeze proof");
            return;
        }
        if proof.sender() != &msg.sender || !proof.is_for(&msg.instance_id, &msg.initiator, msg.round) {
            warn!(%msg, "freeze proof does not match its message");
            return;
        }
        if !proof.evidence.is_well_formed() {
            warn!(%msg, "freeze proof history is malformed");
            return;
        }
        if !self.verifier.is_valid(proof) {
            warn!(%msg, "freeze proof signature invalid");
            return;
        }

        let quorum = self.quorum;
        let round = exec.round_or_create(next, self.timers);
        if !round.add_proof(proof.clone()) {
            return;
        }
        let count = round.proof_count();
        debug!(%msg, count, "freeze proof");
        if !quorum.exceeds_twice_faulty(count) || !round.mark_collect_sent() {
            return;
        }

        let recovery = round.recovery(quorum);
        let good = recovery.good_proposal();
        let proofs: Vec<FreezeProof> = round.proofs().cloned().collect();
        info!(
            instance = %msg.instance_id,
            initiator = %msg.initiator,
            round = next,
            value = %good,
            acc = ?recovery.acc(msg.round),
            poss = ?recovery.poss(msg.round),
            proofs = proofs.len(),
            "collected freeze proofs, leading next round"
        );
        self.multicast(PaxosMessage::new(
            MessageKind::Collect(proofs),
            msg.instance_id.clone(),
            msg.initiator.clone(),
            self.me.clone(),
            msg.round,
            good,
        ));
    }

    fn on_collect(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage, proofs: &[FreezeProof]) {
        let Some(next) = msg.round.checked_add(1) else {
            warn!(%msg, "collect for the last possible round");
            return;
        };
        if msg.sender != exec.leader_of(next) {
            warn!(%msg, "collect not from the round leader, ignoring");
            return;
        }

        let verified: Vec<FreezeProof> = proofs
            .iter()
            .filter(|proof| proof.is_for(&msg.instance_id, &msg.initiator, msg.round))
            .filter(|proof| proof.evidence.is_well_formed())
            .filter(|proof| self.verifier.is_valid(proof))
            .cloned()
            .collect();
        if verified.len() < proofs.len() {
            warn!(%msg, dropped = proofs.len() - verified.len(), "collect carries invalid freeze proofs");
        }
        let senders: BTreeSet<&ParticipantId> = verified.iter().map(FreezeProof::sender).collect();
        if senders.len() < verified.len() {
            warn!(%msg, "collect carries several proofs from one sender, ignoring");
            return;
        }
        if !self.quorum.exceeds_twice_faulty(senders.len()) {
            warn!(%msg, proofs = senders.len(), "collect without enough freeze proofs, ignoring");
            return;
        }

        // judged on the bundled proofs alone, as the leader computed it
        let good = Recovery::analyze(&verified, self.quorum).is_good(&msg.proposal);
        let round = exec.round_or_create(next, self.timers);
        if !round.add_collect(verified) {
            debug!(%msg, "round already collected");
            return;
        }
        if !good {
            warn!(%msg, "protocol violation: {} proposed {} which is not good", msg.sender, msg.proposal);
            return;
        }

        let round = exec.enter(next, self.timers);
        round.add_proposal(&msg.proposal);
        let mut weak = msg.reply(MessageKind::Weak, self.me);
        weak.round = next;
        if round.weak_accept(&weak.proposal) {
            info!(instance = %msg.instance_id, initiator = %msg.initiator, round = next, value = %msg.proposal, "weak-accepted collected value");
            self.multicast(weak);
        }
    }

    fn weak_accept(&mut self, round: &mut PaxosRound, msg: &PaxosMessage) {
        if round.weak_accept(&msg.proposal) {
            info!(instance = %msg.instance_id, initiator = %msg.initiator, round = msg.round, value = %msg.proposal, "weak-accepted");
            self.multicast(msg.reply(MessageKind::Weak, self.me));
        }
    }

    fn freeze(&mut self, exec: &mut PaxosExecution, number: u64) {
        exec.freeze_through(number);
        let value = exec
            .round(number)
            .and_then(PaxosRound::weak_accepted)
            .cloned()
            .unwrap_or_else(Proposal::null);
        info!(instance = %exec.instance_id(), initiator = %exec.initiator(), round = number, "froze round");
        self.multicast(PaxosMessage::new(
            MessageKind::Freeze,
            exec.instance_id().clone(),
            exec.initiator().clone(),
            self.me.clone(),
            number,
            value,
        ));
    }

    fn decide(&mut self, exec: &mut PaxosExecution, msg: &PaxosMessage) {
        if !exec.decide(msg.round, &msg.proposal) {
            return;
        }
        info!(instance = %msg.instance_id, initiator = %msg.initiator, round = msg.round, value = %msg.proposal, "decided");
        self.multicast(msg.reply(MessageKind::Decide, self.me));
    }

    fn multicast(&mut self, message: PaxosMessage) {
        self.outbox.push(Outbound::Multicast(message));
    }
}
