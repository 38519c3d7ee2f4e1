use std::collections::HashMap;

use crate::common::crypto::{Digest, DigestBuilder, Hashable, Keypair, Pubkey, Signature};
use super::message::{InstanceId, ParticipantId, Proposal};

/*
    A freeze proof is the sender's signed statement of everything it weak-
    and strong-accepted up to a round it froze. The next round's leader needs
    more than 2f of them to compute a proposal that cannot contradict
    anything already decided; every receiver of the resulting Collect
    re-verifies the same proofs and recomputes the value.

    The initiator signs its round 0 proposal, so a proof can carry it as a
    fallback that no other participant is able to invent.
*/

const FREEZE_PROOF_DOMAIN: &[u8] = b"paxos-at-war/freeze-proof/v2";
const PROPOSAL_DOMAIN: &[u8] = b"paxos-at-war/proposal/v1";

/// What a participant accepted in a single round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundVotes {
    pub round: u64,
    pub weak: Option<Proposal>,
    pub strong: Option<Proposal>,
}

/// The initiator's round 0 proposal with the initiator's signature over it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedProposal {
    pub value: Proposal,
    pub sig: Signature,
}

impl SignedProposal {
    pub fn sign(
        instance_id: &InstanceId,
        initiator: &ParticipantId,
        value: Proposal,
        keypair: &Keypair,
    ) -> Self {
        let sig = keypair.sign(&proposal_digest(instance_id, initiator, &value));
        SignedProposal { value, sig }
    }

    pub fn digest(&self, instance_id: &InstanceId, initiator: &ParticipantId) -> Digest {
        proposal_digest(instance_id, initiator, &self.value)
    }
}

fn proposal_digest(instance_id: &InstanceId, initiator: &ParticipantId, value: &Proposal) -> Digest {
    DigestBuilder::new(PROPOSAL_DOMAIN)
        .bytes(instance_id.as_str().as_bytes())
        .bytes(initiator.as_str().as_bytes())
        .bytes(value.as_str().as_bytes())
        .finish()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreezeEvidence {
    pub instance_id: InstanceId,
    pub initiator: ParticipantId,
    pub sender: ParticipantId,
    /// The frozen round the values were accepted in.
    pub round: u64,
    pub weak_value: Option<Proposal>,
    pub strong_value: Option<Proposal>,
    /// Earlier rounds in which the sender accepted something, oldest first.
    pub history: Vec<RoundVotes>,
    pub original: Option<SignedProposal>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreezeProof {
    pub evidence: FreezeEvidence,
    pub sig: Signature,
}

impl FreezeEvidence {
    pub fn sign(self, keypair: &Keypair) -> FreezeProof {
        let sig = keypair.sign(&self.hash());
        FreezeProof { evidence: self, sig }
    }

    /// History rounds must be strictly increasing and below the frozen round.
    pub fn is_well_formed(&self) -> bool {
        let mut previous: Option<u64> = None;
        self.history.iter().all(|votes| {
            let ordered = votes.round < self.round && previous.map_or(true, |p| votes.round > p);
            previous = Some(votes.round);
            ordered
        })
    }
}

impl Hashable for FreezeEvidence {
    fn hash(&self) -> Digest {
        let mut builder = DigestBuilder::new(FREEZE_PROOF_DOMAIN);
        builder
            .bytes(self.instance_id.as_str().as_bytes())
            .bytes(self.initiator.as_str().as_bytes())
            .bytes(self.sender.as_str().as_bytes())
            .u64(self.round)
            .optional(self.weak_value.as_ref().map(|v| v.as_str().as_bytes()))
            .optional(self.strong_value.as_ref().map(|v| v.as_str().as_bytes()))
            .u64(self.history.len() as u64);
        for votes in &self.history {
            builder
                .u64(votes.round)
                .optional(votes.weak.as_ref().map(|v| v.as_str().as_bytes()))
                .optional(votes.strong.as_ref().map(|v| v.as_str().as_bytes()));
        }
        builder
            .optional(self.original.as_ref().map(|o| o.value.as_str().as_bytes()))
            .finish()
    }
}

impl FreezeProof {
    pub fn sender(&self) -> &ParticipantId {
        &self.evidence.sender
    }

    /// Whether the proof speaks about the given execution round.
    pub fn is_for(&self, instance_id: &InstanceId, initiator: &ParticipantId, round: u64) -> bool {
        self.evidence.instance_id == *instance_id
            && self.evidence.initiator == *initiator
            && self.evidence.round == round
    }
}

/// Decides whether signed material really comes from the participant it
/// names.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &ParticipantId, digest: &Digest, sig: &Signature) -> bool;

    /// The sender signed the proof and, if it carries the initial proposal,
    /// the initiator signed that too.
    fn is_valid(&self, proof: &FreezeProof) -> bool {
        let evidence = &proof.evidence;
        self.verify(&evidence.sender, &evidence.hash(), &proof.sig)
            && evidence.original.as_ref().map_or(true, |original| {
                self.is_valid_proposal(&evidence.instance_id, &evidence.initiator, original)
            })
    }

    fn is_valid_proposal(
        &self,
        instance_id: &InstanceId,
        initiator: &ParticipantId,
        proposal: &SignedProposal,
    ) -> bool {
        self.verify(initiator, &proposal.digest(instance_id, initiator), &proposal.sig)
    }
}

/// Public keys of all known participants.
#[derive(Clone, Debug)]
pub struct KeyRing {
    keys: HashMap<ParticipantId, Pubkey>,
}

impl FromIterator<(ParticipantId, Pubkey)> for KeyRing {
    fn from_iter<I: IntoIterator<Item = (ParticipantId, Pubkey)>>(iter: I) -> Self {
        KeyRing {
            keys: iter.into_iter().collect(),
        }
    }
}

impl SignatureVerifier for KeyRing {
    fn verify(&self, signer: &ParticipantId, digest: &Digest, sig: &Signature) -> bool {
        let Some(key) = self.keys.get(signer) else {
            tracing::debug!(%signer, "no key registered for signer");
            return false;
        };
        sig.signer == *key && sig.verify(digest)
    }
}
