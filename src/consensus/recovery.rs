//! Recovery of a safe proposal from a set of freeze proofs.
//!
//! Every proof reports what its sender accepted in the frozen round and in
//! the rounds before it. For each round `k` the reports give:
//!
//! - `Acc(k)`: values more than `f` proofs report as weak-accepted in `k`.
//! - `Poss(k)`: values more than `quorumStrong` proofs report as
//!   weak-accepted in `k`, or more than `f` report as strong-accepted.
//!
//! A round speaks for the single member of its `Acc` if there is exactly
//! one, otherwise for the smallest member of its `Poss`. The good proposal
//! is what the latest speaking round speaks for. If no round speaks, it is
//! the smallest initial proposal carried with a valid initiator signature,
//! and `NULL` if there is none. A single sender can never make a round speak
//! on its own, and the result depends only on the set of proofs, never on
//! the order they arrived in.

use std::collections::{BTreeMap, BTreeSet};

use super::message::Proposal;
use super::proof::FreezeProof;
use super::quorum::Quorum;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RoundSets {
    acc: BTreeSet<Proposal>,
    poss: BTreeSet<Proposal>,
}

impl RoundSets {
    fn verdict(&self) -> Option<&Proposal> {
        if self.acc.len() == 1 {
            return self.acc.first();
        }
        self.poss.first()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recovery {
    rounds: BTreeMap<u64, RoundSets>,
    originals: BTreeSet<Proposal>,
}

type Counts<'a> = BTreeMap<(u64, &'a Proposal), usize>;

fn bump<'a>(counts: &mut Counts<'a>, round: u64, value: Option<&'a Proposal>) {
    if let Some(value) = value {
        *counts.entry((round, value)).or_insert(0) += 1;
    }
}

impl Recovery {
    /// Analyzes proofs from distinct senders whose signatures were already
    /// checked. Proofs with a malformed history are left out.
    pub fn analyze<'a>(proofs: impl IntoIterator<Item = &'a FreezeProof>, quorum: Quorum) -> Self {
        let mut weak: Counts = BTreeMap::new();
        let mut strong: Counts = BTreeMap::new();
        let mut originals = BTreeSet::new();

        for proof in proofs {
            let evidence = &proof.evidence;
            if !evidence.is_well_formed() {
                tracing::debug!(sender = %evidence.sender, "skipping proof with malformed history");
                continue;
            }
            for votes in &evidence.history {
                bump(&mut weak, votes.round, votes.weak.as_ref());
                bump(&mut strong, votes.round, votes.strong.as_ref());
            }
            bump(&mut weak, evidence.round, evidence.weak_value.as_ref());
            bump(&mut strong, evidence.round, evidence.strong_value.as_ref());
            if let Some(original) = &evidence.original {
                originals.insert(original.value.clone());
            }
        }

        let mut rounds: BTreeMap<u64, RoundSets> = BTreeMap::new();
        for (&(round, value), &count) in &weak {
            let sets = rounds.entry(round).or_default();
            if quorum.exceeds_faulty(count) {
                sets.acc.insert(value.clone());
            }
            if count > quorum.strong() {
                sets.poss.insert(value.clone());
            }
        }
        for (&(round, value), &count) in &strong {
            let sets = rounds.entry(round).or_default();
            if quorum.exceeds_faulty(count) {
                sets.poss.insert(value.clone());
            }
        }

        Recovery { rounds, originals }
    }

    pub fn acc(&self, round: u64) -> BTreeSet<Proposal> {
        self.rounds.get(&round).map(|sets| sets.acc.clone()).unwrap_or_default()
    }

    pub fn poss(&self, round: u64) -> BTreeSet<Proposal> {
        self.rounds.get(&round).map(|sets| sets.poss.clone()).unwrap_or_default()
    }

    pub fn good_proposal(&self) -> Proposal {
        if let Some(value) = self.rounds.values().rev().find_map(RoundSets::verdict) {
            return value.clone();
        }
        self.originals.first().cloned().unwrap_or_else(Proposal::null)
    }

    pub fn is_good(&self, value: &Proposal) -> bool {
        self.good_proposal() == *value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::Keypair;
    use crate::consensus::proof::{FreezeEvidence, RoundVotes, SignedProposal};

    fn keypair(id: &str) -> Keypair {
        Keypair::from_seed([id.as_bytes()[0]; 32])
    }

    fn original(value: &str) -> SignedProposal {
        SignedProposal::sign(&"epoch".into(), &"a".into(), value.into(), &keypair("a"))
    }

    fn votes(round: u64, weak: Option<&str>, strong: Option<&str>) -> RoundVotes {
        RoundVotes {
            round,
            weak: weak.map(Proposal::from),
            strong: strong.map(Proposal::from),
        }
    }

    fn proof(sender: &str, weak: Option<&str>, strong: Option<&str>, original_value: Option<&str>) -> FreezeProof {
        proof_at(sender, 0, weak, strong, Vec::new(), original_value)
    }

    fn proof_at(
        sender: &str,
        round: u64,
        weak: Option<&str>,
        strong: Option<&str>,
        history: Vec<RoundVotes>,
        original_value: Option<&str>,
    ) -> FreezeProof {
        FreezeEvidence {
            instance_id: "epoch".into(),
            initiator: "a".into(),
            sender: sender.into(),
            round,
            weak_value: weak.map(Proposal::from),
            strong_value: strong.map(Proposal::from),
            history,
            original: original_value.map(original),
        }
        .sign(&keypair(sender))
    }

    #[test]
    fn test_single_acc_wins() {
        // n = 4, f = 1: two weak reports make X acceptable
        let proofs = [
            proof("a", Some("X"), None, None),
            proof("b", Some("X"), None, None),
            proof("c", Some("Y"), None, None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert_eq!(recovery.acc(0).len(), 1);
        assert_eq!(recovery.good_proposal(), Proposal::from("X"));
        assert!(recovery.is_good(&"X".into()));
        assert!(!recovery.is_good(&"Y".into()));
    }

    #[test]
    fn test_ambiguous_acc_falls_back_to_smallest_poss() {
        // n = 7, f = 2, quorumStrong = 4
        let proofs = [
            proof("a", Some("Y"), Some("Y"), None),
            proof("b", Some("Y"), Some("Y"), None),
            proof("c", Some("Y"), Some("Y"), None),
            proof("d", Some("X"), Some("X"), None),
            proof("e", Some("X"), Some("X"), None),
            proof("f", Some("X"), Some("X"), None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(7));
        assert_eq!(recovery.acc(0).len(), 2);
        assert_eq!(recovery.poss(0).len(), 2);
        assert_eq!(recovery.good_proposal(), Proposal::from("X"));
    }

    #[test]
    fn test_poss_from_weak_majority() {
        // n = 10, f = 3, quorumStrong = 6: seven weak reports put Z in Poss
        // while W and Z both sit in Acc
        let mut proofs: Vec<FreezeProof> = (b'a'..=b'g')
            .map(|s| proof(&(s as char).to_string(), Some("Z"), None, None))
            .collect();
        for s in [b'h', b'i', b'j', b'k'] {
            proofs.push(proof(&(s as char).to_string(), Some("W"), None, None));
        }
        let recovery = Recovery::analyze(&proofs, Quorum::new(10));
        assert_eq!(recovery.acc(0).len(), 2);
        assert!(recovery.poss(0).contains(&Proposal::from("Z")));
        assert!(!recovery.poss(0).contains(&Proposal::from("W")));
        assert_eq!(recovery.good_proposal(), Proposal::from("Z"));
    }

    #[test]
    fn test_fallback_to_original() {
        let proofs = [
            proof("a", None, None, Some("X")),
            proof("b", None, None, None),
            proof("c", None, None, None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert!(recovery.acc(0).is_empty());
        assert!(recovery.poss(0).is_empty());
        assert_eq!(recovery.good_proposal(), Proposal::from("X"));
    }

    #[test]
    fn test_fallback_to_null() {
        let proofs = [proof("a", None, None, None), proof("b", Some("X"), None, None)];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert_eq!(recovery.good_proposal(), Proposal::null());
    }

    #[test]
    fn test_latest_speaking_round_wins() {
        // X was accepted in round 0, NULL was collected and accepted in round 2
        let proofs = [
            proof_at("a", 3, None, None, vec![votes(0, Some("X"), None), votes(2, Some("NULL"), None)], None),
            proof_at("b", 3, None, None, vec![votes(0, Some("X"), None), votes(2, Some("NULL"), None)], None),
            proof_at("c", 3, None, None, vec![votes(0, Some("X"), None)], None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert_eq!(recovery.acc(0), BTreeSet::from([Proposal::from("X")]));
        assert_eq!(recovery.good_proposal(), Proposal::null());
    }

    #[test]
    fn test_lone_report_cannot_override_earlier_round() {
        // c decided X in round 0 on its own; a and b carried X into round 1.
        // d claims to have accepted EVIL in the frozen round 2.
        let honest = vec![votes(0, Some("X"), Some("X")), votes(1, Some("X"), None)];
        let proofs = [
            proof_at("a", 2, None, None, honest.clone(), Some("X")),
            proof_at("b", 2, None, None, honest, Some("X")),
            proof_at("d", 2, Some("EVIL"), Some("EVIL"), vec![votes(1, Some("EVIL"), Some("EVIL"))], None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert!(recovery.acc(2).is_empty());
        assert!(recovery.poss(2).is_empty());
        assert_eq!(recovery.acc(1), BTreeSet::from([Proposal::from("X")]));
        assert_eq!(recovery.good_proposal(), Proposal::from("X"));
        assert!(!recovery.is_good(&"EVIL".into()));
    }

    #[test]
    fn test_malformed_history_ignored() {
        // d reports votes for a round at or after the one it froze
        let proofs = [
            proof_at("a", 1, None, None, Vec::new(), None),
            proof_at("b", 1, None, None, Vec::new(), None),
            proof_at("d", 1, None, None, vec![votes(5, Some("EVIL"), None), votes(6, Some("EVIL"), None)], Some("X")),
            proof_at("c", 1, None, None, vec![votes(5, Some("EVIL"), None)], None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert!(recovery.acc(5).is_empty());
        assert_eq!(recovery.good_proposal(), Proposal::null());
    }

    #[test]
    fn test_smallest_original_when_initiator_equivocates() {
        let proofs = [
            proof("b", None, None, Some("Y")),
            proof("c", None, None, Some("X")),
            proof("d", None, None, None),
        ];
        let recovery = Recovery::analyze(&proofs, Quorum::new(4));
        assert_eq!(recovery.good_proposal(), Proposal::from("X"));
    }

    #[test]
    fn test_independent_of_arrival_order() {
        let proofs = vec![
            proof_at("a", 1, Some("Y"), Some("Y"), vec![votes(0, Some("Q"), None)], Some("Q")),
            proof_at("b", 1, Some("X"), None, Vec::new(), Some("P")),
            proof_at("c", 1, Some("Y"), None, vec![votes(0, Some("Q"), Some("Q"))], Some("P")),
            proof_at("d", 1, Some("X"), Some("X"), Vec::new(), Some("Q")),
            proof_at("e", 1, None, Some("X"), vec![votes(0, Some("P"), None)], None),
        ];
        let quorum = Quorum::new(7);
        let forward = Recovery::analyze(&proofs, quorum);
        let backward = Recovery::analyze(proofs.iter().rev(), quorum);
        let mut shuffled = proofs.clone();
        shuffled.swap(0, 3);
        shuffled.swap(1, 4);
        let shuffled = Recovery::analyze(&shuffled, quorum);

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.good_proposal(), shuffled.good_proposal());
    }
}
