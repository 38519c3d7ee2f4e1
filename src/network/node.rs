use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::info;

use crate::common::config::Config;
use crate::common::crypto::Keypair;
use crate::common::error::AgreementError;
use crate::common::timer::TokioTimer;
use crate::consensus::{
    Agreement, AgreementListener, Collaborators, KeyRing, ParticipantId, Participant,
};
use super::ChannelTransport;

/// A participant running on its own task.
pub struct Node {
    pub participant: Participant,
    task: JoinHandle<()>,
}

/// Every configured participant in one process, wired together over
/// channels. Each node gets a fresh keypair; the shared key ring holds all
/// public keys.
pub struct LocalCluster {
    nodes: Vec<Node>,
    agreements: UnboundedReceiver<Agreement>,
}

impl LocalCluster {
    /// Spawns the cluster on the current tokio runtime.
    pub fn spawn(config: &Config) -> Result<Self, AgreementError> {
        let ids: Vec<ParticipantId> = config
            .network
            .participants
            .iter()
            .map(|id| ParticipantId::from(id.as_str()))
            .collect();
        if ids.is_empty() {
            return Err(AgreementError::NoParticipants);
        }

        let keypairs: Vec<Keypair> = ids.iter().map(|_| Keypair::new_pair()).collect();
        let keyring: KeyRing = ids
            .iter()
            .cloned()
            .zip(keypairs.iter().map(Keypair::pubkey))
            .collect();
        let verifier = Arc::new(keyring);
        let transport = Arc::new(ChannelTransport::new());
        let timer = Arc::new(TokioTimer::new()?);
        let (agreement_tx, agreements) = mpsc::unbounded_channel();
        let listener: Arc<dyn AgreementListener> = Arc::new(agreement_tx);

        let mut nodes = Vec::with_capacity(ids.len());
        for (id, keypair) in ids.iter().zip(keypairs) {
            let (inbox_tx, inbox_rx) = mpsc::channel(config.network.channel_capacity);
            transport.register(id.clone(), inbox_tx);

            let participant = Participant::new(
                id.clone(),
                keypair,
                ids.iter().cloned(),
                config.agreement.clone(),
                Collaborators {
                    transport: transport.clone(),
                    timer: timer.clone(),
                    verifier: verifier.clone(),
                    listener: listener.clone(),
                },
            )?;
            let runner = participant.clone();
            let task = tokio::spawn(async move { runner.run(inbox_rx).await });
            nodes.push(Node { participant, task });
        }

        info!(participants = nodes.len(), "local cluster running");
        Ok(LocalCluster { nodes, agreements })
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.nodes.iter().map(|node| &node.participant)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Waits for the next agreement reported by any node.
    pub async fn next_agreement(&mut self) -> Option<Agreement> {
        self.agreements.recv().await
    }

    pub fn shutdown(self) {
        for node in self.nodes {
            node.task.abort();
        }
        info!("local cluster stopped");
    }
}
