/*
    Runs one agreement instance over a local cluster. Every participant
    proposes a random seed; each one reports the agreed seeds once all
    executions decided. A silent or slow participant ends up with NULL for
    its own execution after the round timeout.

    Usage: paxos-at-war [config.toml]
*/

use std::path::Path;

use paxos_at_war::common::config::Config;
use paxos_at_war::common::error::AgreementError;
use paxos_at_war::consensus::{InstanceId, Proposal};
use paxos_at_war::network::LocalCluster;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AgreementError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };

    let mut cluster = LocalCluster::spawn(&config)?;
    let instance = InstanceId::new(format!("epoch-{}", rand::random::<u32>()));
    for participant in cluster.participants() {
        let seed = format!("{:016x}", rand::random::<u64>());
        participant.propose(&instance, Proposal::new(seed));
    }

    // every round may time out once before the cluster settles
    let deadline = config
        .agreement
        .round_timeout(0)
        .saturating_add(config.agreement.round_timeout(1).saturating_mul(4));
    let quorum = cluster.participants().next().map(|p| p.quorum());
    for _ in 0..cluster.len() {
        match tokio::time::timeout(deadline, cluster.next_agreement()).await {
            Ok(Some(agreement)) => {
                let usable = quorum.is_some_and(|q| agreement.meets_two_thirds(q));
                info!(
                    instance = %agreement.instance_id,
                    observer = %agreement.observer,
                    contributions = agreement.contributions(),
                    usable,
                    "agreement reached"
                );
                for (initiator, value) in &agreement.decisions {
                    info!(observer = %agreement.observer, %initiator, %value, "decided");
                }
            }
            Ok(None) => break,
            Err(_) => {
                warn!(after = ?deadline, "gave up waiting for agreement");
                break;
            }
        }
    }

    cluster.shutdown();
    Ok(())
}
