//! Fan-out of one payload to every registered peer but the sender.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::registry::{Peer, PeerId, Registry};

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayConfig {
    /// Upper bound on a single write to one peer. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Relay {
    registry: Arc<Registry>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(registry: Arc<Registry>, config: RelayConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Delivers `payload` to every peer registered right now except `exclude`.
    ///
    /// Writes happen one peer at a time, outside the registry lock. A failed or
    /// timed out write is logged and skipped; the affected peer's own session
    /// notices the broken transport and unregisters itself. Returns how many
    /// peers accepted the payload.
    pub async fn broadcast(&self, payload: &[u8], exclude: Option<PeerId>) -> usize {
        let recipients = self.registry.snapshot_excluding(exclude);
        let mut delivered = 0;

        for peer in &recipients {
            if self.deliver(peer, payload).await {
                delivered += 1;
            }
        }

        debug!(
            recipients = recipients.len(),
            delivered,
            bytes = payload.len(),
            "broadcast complete"
        );
        delivered
    }

    async fn deliver(&self, peer: &Peer, payload: &[u8]) -> bool {
        let result = match self.config.write_timeout {
            Some(limit) => match timeout(limit, peer.send(payload)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(peer = %peer.label(), ?limit, "write timed out; skipping peer");
                    return false;
                }
            },
            None => peer.send(payload).await,
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                debug!(peer = %peer.label(), ?error, "failed to deliver message to peer");
                false
            }
        }
    }
}
