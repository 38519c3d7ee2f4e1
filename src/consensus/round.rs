use std::collections::{BTreeMap, BTreeSet};

use crate::common::timer::TimerHandle;
use super::message::{ParticipantId, Proposal};
use super::proof::FreezeProof;
use super::quorum::Quorum;
use super::recovery::Recovery;

/// Votes of one kind within a round. Each sender is counted once, for the
/// first value it voted for.
#[derive(Debug, Default)]
pub struct Tally {
    votes: BTreeMap<Proposal, BTreeSet<ParticipantId>>,
    voters: BTreeSet<ParticipantId>,
}

impl Tally {
    /// Records a vote. Returns false for a repeated or second vote by the
    /// same sender.
    pub fn add(&mut self, proposal: &Proposal, sender: &ParticipantId) -> bool {
        if !self.voters.insert(sender.clone()) {
            return false;
        }
        self.votes
            .entry(proposal.clone())
            .or_default()
            .insert(sender.clone());
        true
    }

    pub fn count(&self, proposal: &Proposal) -> usize {
        self.votes.get(proposal).map_or(0, BTreeSet::len)
    }
}

/*
    Round lifecycle: a round starts active, with its timer armed once the
    participant has entered it. Weak and
    strong acceptance are independent set-once flags. Freezing (timeout or
    more than f peers froze) stops any further acceptance; aborting (more
    than 2f froze) ends the round and hands over to the successor. Deciding
    can happen from either the active or the frozen state.
*/

#[derive(Debug)]
pub struct PaxosRound {
    leader: ParticipantId,
    proposal: Option<Proposal>,
    weak_accepted: Option<Proposal>,
    strong_accepted: Option<Proposal>,
    weak: Tally,
    strong: Tally,
    decide: Tally,
    freezes: BTreeSet<ParticipantId>,
    proofs: BTreeMap<ParticipantId, FreezeProof>,
    frozen: bool,
    aborted: bool,
    collected: bool,
    collect_sent: bool,
    decided: Option<Proposal>,
    timer: Option<TimerHandle>,
}

impl PaxosRound {
    pub fn new(leader: ParticipantId, timer: Option<TimerHandle>) -> Self {
        PaxosRound {
            leader,
            proposal: None,
            weak_accepted: None,
            strong_accepted: None,
            weak: Tally::default(),
            strong: Tally::default(),
            decide: Tally::default(),
            freezes: BTreeSet::new(),
            proofs: BTreeMap::new(),
            frozen: false,
            aborted: false,
            collected: false,
            collect_sent: false,
            decided: None,
            timer,
        }
    }

    pub fn leader(&self) -> &ParticipantId {
        &self.leader
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    /// Stores the round's proposal. Only the first one is kept.
    pub fn add_proposal(&mut self, proposal: &Proposal) -> bool {
        if self.proposal.is_some() {
            return false;
        }
        self.proposal = Some(proposal.clone());
        true
    }

    pub fn add_weak(&mut self, proposal: &Proposal, sender: &ParticipantId) -> bool {
        self.weak.add(proposal, sender)
    }

    pub fn add_strong(&mut self, proposal: &Proposal, sender: &ParticipantId) -> bool {
        self.strong.add(proposal, sender)
    }

    pub fn add_decide(&mut self, proposal: &Proposal, sender: &ParticipantId) -> bool {
        self.decide.add(proposal, sender)
    }

    pub fn weak_count(&self, proposal: &Proposal) -> usize {
        self.weak.count(proposal)
    }

    pub fn strong_count(&self, proposal: &Proposal) -> usize {
        self.strong.count(proposal)
    }

    pub fn decide_count(&self, proposal: &Proposal) -> usize {
        self.decide.count(proposal)
    }

    pub fn weak_accepted(&self) -> Option<&Proposal> {
        self.weak_accepted.as_ref()
    }

    pub fn strong_accepted(&self) -> Option<&Proposal> {
        self.strong_accepted.as_ref()
    }

    pub fn weak_accept(&mut self, proposal: &Proposal) -> bool {
        if self.frozen || self.weak_accepted.is_some() {
            return false;
        }
        self.weak_accepted = Some(proposal.clone());
        true
    }

    pub fn strong_accept(&mut self, proposal: &Proposal) -> bool {
        if self.frozen || self.strong_accepted.is_some() {
            return false;
        }
        self.strong_accepted = Some(proposal.clone());
        true
    }

    pub fn add_freeze(&mut self, sender: &ParticipantId) -> bool {
        self.freezes.insert(sender.clone())
    }

    pub fn freeze_count(&self) -> usize {
        self.freezes.len()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
        self.cancel_timer();
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn abort(&mut self) {
        self.aborted = true;
        self.cancel_timer();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn decide(&mut self, proposal: &Proposal) -> bool {
        if self.decided.is_some() {
            return false;
        }
        self.decided = Some(proposal.clone());
        self.cancel_timer();
        true
    }

    pub fn decided(&self) -> Option<&Proposal> {
        self.decided.as_ref()
    }

    pub fn is_decided(&self) -> bool {
        self.decided.is_some()
    }

    /// Adds a freeze proof, one per sender. The caller verifies the signature.
    pub fn add_proof(&mut self, proof: FreezeProof) -> bool {
        if self.proofs.contains_key(proof.sender()) {
            return false;
        }
        self.proofs.insert(proof.sender().clone(), proof);
        true
    }

    pub fn proof_count(&self) -> usize {
        self.proofs.len()
    }

    pub fn proofs(&self) -> impl Iterator<Item = &FreezeProof> {
        self.proofs.values()
    }

    /// Merges the proofs bundled in a Collect. Only the first Collect for
    /// the round is taken.
    pub fn add_collect(&mut self, proofs: Vec<FreezeProof>) -> bool {
        if self.collected {
            return false;
        }
        self.collected = true;
        for proof in proofs {
            self.add_proof(proof);
        }
        true
    }

    /// Marks the Collect for this round as sent. Returns false if it already was.
    pub fn mark_collect_sent(&mut self) -> bool {
        !std::mem::replace(&mut self.collect_sent, true)
    }

    pub fn recovery(&self, quorum: Quorum) -> Recovery {
        Recovery::analyze(self.proofs.values(), quorum)
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn set_timer(&mut self, timer: Option<TimerHandle>) {
        self.cancel_timer();
        self.timer = timer;
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }

    /// Whether a timeout firing now should freeze the round.
    pub fn should_freeze_on_timeout(&self) -> bool {
        !self.frozen && !self.aborted && self.decided.is_none()
    }
}
