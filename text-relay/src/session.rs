//! Per-connection read loop and its teardown.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::{
    registry::{Peer, Registry},
    relay::Relay,
};

/// Size of a single read from a peer. Larger bursts are relayed as several chunks.
pub const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// Origin-tagged form of a chunk read from `peer`.
pub fn tag_message(peer: &Peer, chunk: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(peer.label().len() + 2 + chunk.len());
    message.extend_from_slice(peer.label().as_bytes());
    message.extend_from_slice(b": ");
    message.extend_from_slice(chunk);
    message
}

pub fn departure_notice(peer: &Peer) -> Vec<u8> {
    format!("{} has left the chat.", peer.label()).into_bytes()
}

/// One peer's read loop.
///
/// Building a `Session` arms the cleanup for an already registered peer: if
/// the session is dropped at any point, including before it is first polled,
/// the peer is unregistered.
pub struct Session<R> {
    relay: Relay,
    peer: Arc<Peer>,
    reader: R,
    registration: Registration,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(relay: Relay, peer: Arc<Peer>, reader: R) -> Self {
        let registration = Registration {
            registry: Arc::clone(relay.registry()),
            peer: Arc::clone(&peer),
        };
        Self {
            relay,
            peer,
            reader,
            registration,
        }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Reads until the transport stops yielding bytes, then tears down.
    ///
    /// The peer is unregistered before the departure notice goes out, so the
    /// notice only reaches the peers that remain.
    pub async fn run(self) -> SessionState {
        let Session {
            relay,
            peer,
            mut reader,
            registration,
        } = self;
        let mut state = SessionState::Active;
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        while state == SessionState::Active {
            state = match reader.read(&mut buffer).await {
                Ok(0) => {
                    debug!(peer = %peer.label(), "peer closed the stream");
                    SessionState::Closing
                }
                Ok(n) => {
                    let message = tag_message(&peer, &buffer[..n]);
                    info!(
                        peer = %peer.label(),
                        text = %String::from_utf8_lossy(&buffer[..n]).trim_end(),
                        "broadcasting"
                    );
                    relay.broadcast(&message, Some(peer.id())).await;
                    SessionState::Active
                }
                Err(error) => {
                    debug!(peer = %peer.label(), ?error, "read failed");
                    SessionState::Closing
                }
            };
        }

        info!(peer = %peer.label(), "client disconnected");
        drop(registration);
        relay.broadcast(&departure_notice(&peer), None).await;

        if let Err(error) = peer.close().await {
            debug!(peer = %peer.label(), ?error, "failed to shut down transport");
        }
        drop(reader);

        SessionState::Closed
    }
}

/// Unregisters the peer when dropped.
struct Registration {
    registry: Arc<Registry>,
    peer: Arc<Peer>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.peer.id());
    }
}
