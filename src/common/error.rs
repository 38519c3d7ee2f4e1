use std::path::PathBuf;

use crate::consensus::{InstanceId, ParticipantId};

/// Errors that make a participant unusable. These surface at construction
/// or configuration time; nothing inside message handling returns them.
#[derive(Debug, thiserror::Error)]
pub enum AgreementError {
    #[error("participant set is empty, no quorum can be formed")]
    NoParticipants,
    #[error("local participant {0} is not a member of the participant set")]
    NotAParticipant(ParticipantId),
    #[error("timer requires a running tokio runtime")]
    NoRuntime,
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Reasons an inbound message could not be resolved to a live round.
/// Logged and dropped by the participant.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("sender {0} is not a known participant")]
    UnknownSender(ParticipantId),
    #[error("instance {0} is unknown and sender {1} cannot open it")]
    UnknownInstance(InstanceId, ParticipantId),
    #[error("initiator {initiator} has no execution in instance {instance}")]
    UnknownInitiator {
        instance: InstanceId,
        initiator: ParticipantId,
    },
}
