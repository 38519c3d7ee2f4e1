use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::warn;

use crate::consensus::{ParticipantId, PaxosMessage};
use super::Transport;

/// In-process transport: one bounded tokio channel per participant.
#[derive(Default)]
pub struct ChannelTransport {
    routes: RwLock<HashMap<ParticipantId, Sender<PaxosMessage>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ParticipantId, inbox: Sender<PaxosMessage>) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, inbox);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, target: &ParticipantId, message: PaxosMessage) {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(inbox) = routes.get(target) else {
            warn!(%target, %message, "no route to participant");
            return;
        };
        match inbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => warn!(%target, %message, "inbox full, dropping message"),
            Err(TrySendError::Closed(message)) => warn!(%target, %message, "inbox closed, dropping message"),
        }
    }
}
