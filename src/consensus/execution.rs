use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::timer::TimerHandle;
use super::message::{InstanceId, ParticipantId, Proposal};
use super::peers::Peers;
use super::proof::{RoundVotes, SignedProposal};
use super::round::PaxosRound;

/// Arms the timeout of a freshly created round.
pub trait RoundTimers {
    fn arm(&self, initiator: &ParticipantId, round: u64) -> Option<TimerHandle>;
}

/// Rounds without timeouts.
pub struct NoTimers;

impl RoundTimers for NoTimers {
    fn arm(&self, _initiator: &ParticipantId, _round: u64) -> Option<TimerHandle> {
        None
    }
}

/// One agreement attempt: the rounds run for a single initiator's proposal
/// and the value they settle on.
#[derive(Debug)]
pub struct PaxosExecution {
    instance_id: InstanceId,
    initiator: ParticipantId,
    leaders: Arc<Peers>,
    rounds: BTreeMap<u64, PaxosRound>,
    original: Option<SignedProposal>,
    /// Highest round this participant has moved into.
    entered: u64,
    decided: Option<Proposal>,
    frozen_through: Option<u64>,
    cancelled: bool,
}

impl PaxosExecution {
    /// Creates the execution together with its round 0.
    pub fn new(
        instance_id: InstanceId,
        initiator: ParticipantId,
        leaders: Arc<Peers>,
        timers: &dyn RoundTimers,
    ) -> Self {
        let mut execution = PaxosExecution {
            instance_id,
            initiator,
            leaders,
            rounds: BTreeMap::new(),
            original: None,
            entered: 0,
            decided: None,
            frozen_through: None,
            cancelled: false,
        };
        execution.round_or_create(0, timers);
        execution
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn initiator(&self) -> &ParticipantId {
        &self.initiator
    }

    pub fn leader_of(&self, round: u64) -> ParticipantId {
        self.leaders
            .get_leader(&self.initiator, round)
            .cloned()
            .unwrap_or_else(|| self.initiator.clone())
    }

    pub fn round(&self, number: u64) -> Option<&PaxosRound> {
        self.rounds.get(&number)
    }

    pub fn round_mut(&mut self, number: u64) -> Option<&mut PaxosRound> {
        self.rounds.get_mut(&number)
    }

    /// Looks a round up, creating it on first use. Only rounds up to the
    /// entered one get a timer; a round first heard of from peers' votes
    /// stays untimed until it is entered.
    pub fn round_or_create(&mut self, number: u64, timers: &dyn RoundTimers) -> &mut PaxosRound {
        let initiator = &self.initiator;
        let leaders = &self.leaders;
        let cancelled = self.cancelled;
        let timed = number <= self.entered && self.decided.is_none();
        let below_frozen = self.frozen_through.is_some_and(|frozen| number <= frozen);
        self.rounds.entry(number).or_insert_with(|| {
            let leader = leaders
                .get_leader(initiator, number)
                .cloned()
                .unwrap_or_else(|| initiator.clone());
            tracing::debug!(%initiator, round = number, %leader, timed, "creating round");
            if cancelled || below_frozen {
                let mut round = PaxosRound::new(leader, None);
                round.freeze();
                if cancelled {
                    round.abort();
                }
                return round;
            }
            let timer = if timed { timers.arm(initiator, number) } else { None };
            PaxosRound::new(leader, timer)
        })
    }

    /// Moves this participant into round `number`, arming its timer unless
    /// the round is already timed or can no longer time out.
    pub fn enter(&mut self, number: u64, timers: &dyn RoundTimers) -> &mut PaxosRound {
        self.entered = self.entered.max(number);
        let decided = self.decided.is_some();
        let initiator = self.initiator.clone();
        let round = self.round_or_create(number, timers);
        if !decided && !round.has_timer() && round.should_freeze_on_timeout() {
            round.set_timer(timers.arm(&initiator, number));
        }
        round
    }

    /// Keeps the initiator's signed round 0 proposal. Only the first is kept.
    pub fn set_original(&mut self, original: SignedProposal) -> bool {
        if self.original.is_some() {
            return false;
        }
        self.original = Some(original);
        true
    }

    /// The initiator's round 0 proposal, if it reached this participant.
    pub fn original_proposal(&self) -> Option<&SignedProposal> {
        self.original.as_ref()
    }

    /// What this participant accepted in each round before `before`,
    /// skipping rounds where it accepted nothing.
    pub fn history(&self, before: u64) -> Vec<RoundVotes> {
        self.rounds
            .range(..before)
            .filter(|(_, round)| round.weak_accepted().is_some() || round.strong_accepted().is_some())
            .map(|(number, round)| RoundVotes {
                round: *number,
                weak: round.weak_accepted().cloned(),
                strong: round.strong_accepted().cloned(),
            })
            .collect()
    }

    /// Freezes round `number` and every round below it. Once a round is
    /// frozen nothing is accepted in it or in any earlier round.
    pub fn freeze_through(&mut self, number: u64) {
        let through = self.frozen_through.map_or(number, |frozen| frozen.max(number));
        self.frozen_through = Some(through);
        for (_, round) in self.rounds.range_mut(..=through) {
            round.freeze();
        }
    }

    /// Sets the decided value once, reached in round `number`, and stops
    /// every round timer. Rounds past both `number` and the entered round
    /// were only ever heard of from peers and are dropped.
    pub fn decide(&mut self, number: u64, proposal: &Proposal) -> bool {
        if self.decided.is_some() {
            return false;
        }
        self.decided = Some(proposal.clone());
        if let Some(round) = self.rounds.get_mut(&number) {
            round.decide(proposal);
        }
        if let Some(past) = self.entered.max(number).checked_add(1) {
            let dropped = self.rounds.split_off(&past).len();
            if dropped > 0 {
                tracing::debug!(initiator = %self.initiator, dropped, "dropping rounds never entered");
            }
        }
        for round in self.rounds.values_mut() {
            round.cancel_timer();
        }
        true
    }

    pub fn decided_value(&self) -> Option<&Proposal> {
        self.decided.as_ref()
    }

    pub fn is_decided(&self) -> bool {
        self.decided.is_some()
    }

    /// Freezes and aborts every round, so nothing more gets accepted.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        for round in self.rounds.values_mut() {
            round.freeze();
            round.abort();
        }
    }
}
