use std::fmt;

use crate::common::crypto::Signature;
use super::proof::FreezeProof;

/*
    Every message is stamped with the instance it belongs to, the initiator
    whose execution it concerns, its author and the round. Propose, Weak,
    Strong and Decide carry the value being voted on. Freeze abandons a
    round. FreezeProof reports the sender's accepted values for a frozen
    round to the next round's leader, who bundles enough of them into a
    Collect carrying the recovered proposal.
*/

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(
    /// Identifies a directory node taking part in the agreement.
    ParticipantId
);
string_id!(
    /// Identifies one agreement instance, e.g. an epoch.
    InstanceId
);
string_id!(
    /// An opaque value agreed upon by an execution.
    Proposal
);

const NULL_PROPOSAL: &str = "NULL";

impl Proposal {
    /// The value chosen when nothing can be recovered for an execution.
    pub fn null() -> Self {
        Proposal(NULL_PROPOSAL.to_owned())
    }

    pub fn is_null(&self) -> bool {
        self.0 == NULL_PROPOSAL
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Propose(Signature),
    Weak,
    Strong,
    Decide,
    Freeze,
    FreezeProof(FreezeProof),
    Collect(Vec<FreezeProof>),
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Propose(_) => "propose",
            MessageKind::Weak => "weak",
            MessageKind::Strong => "strong",
            MessageKind::Decide => "decide",
            MessageKind::Freeze => "freeze",
            MessageKind::FreezeProof(_) => "freeze-proof",
            MessageKind::Collect(_) => "collect",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaxosMessage {
    pub instance_id: InstanceId,
    pub initiator: ParticipantId,
    pub sender: ParticipantId,
    pub round: u64,
    pub proposal: Proposal,
    pub kind: MessageKind,
}

impl PaxosMessage {
    pub fn new(
        kind: MessageKind,
        instance_id: InstanceId,
        initiator: ParticipantId,
        sender: ParticipantId,
        round: u64,
        proposal: Proposal,
    ) -> Self {
        PaxosMessage {
            instance_id,
            initiator,
            sender,
            round,
            proposal,
            kind,
        }
    }

    /// Same execution, round and value as `self`, authored by `sender`.
    pub fn reply(&self, kind: MessageKind, sender: &ParticipantId) -> Self {
        PaxosMessage {
            instance_id: self.instance_id.clone(),
            initiator: self.initiator.clone(),
            sender: sender.clone(),
            round: self.round,
            proposal: self.proposal.clone(),
            kind,
        }
    }

    pub fn is_kind(&self, name: &str) -> bool {
        self.kind.name() == name
    }
}

impl fmt::Display for PaxosMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} for {}/{} round {} ({})",
            self.kind.name(),
            self.sender,
            self.instance_id,
            self.initiator,
            self.round,
            self.proposal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_proposal() {
        assert!(Proposal::null().is_null());
        assert!(!Proposal::from("X").is_null());
    }

    #[test]
    fn test_ids_order_lexicographically() {
        let mut ids = vec![ParticipantId::from("c"), "a".into(), "b".into()];
        ids.sort();
        let expected: Vec<ParticipantId> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_reply_keeps_routing() {
        let msg = PaxosMessage::new(
            MessageKind::Freeze,
            "epoch-1".into(),
            "a".into(),
            "a".into(),
            2,
            "X".into(),
        );
        let weak = msg.reply(MessageKind::Weak, &"b".into());

        assert_eq!(weak.sender, ParticipantId::from("b"));
        assert_eq!(weak.initiator, msg.initiator);
        assert_eq!(weak.proposal, msg.proposal);
        assert!(weak.is_kind("weak"));
        assert_eq!(weak.to_string(), "weak from b for epoch-1/a round 2 (X)");
    }
}
