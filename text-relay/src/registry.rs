//! Membership set of the peers currently attached to the relay.
//!
//! The registry is the only shared mutable state in the server. Every
//! operation takes the internal lock exactly once and releases it before
//! returning, so no caller can hold it across a write to a peer.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex as AsyncMutex,
};

/// Write half of a peer's transport, boxed so any stream type can be relayed to.
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-local identifier of one live connection.
///
/// Ids come from a monotonically increasing counter and are never reused while
/// the process runs, so two peers never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected remote party as seen by the relay.
///
/// The write half lives behind its own async lock so concurrent broadcasts
/// never interleave bytes within one payload. That lock is independent of the
/// registry lock.
pub struct Peer {
    id: PeerId,
    label: String,
    writer: AsyncMutex<PeerWriter>,
}

impl Peer {
    pub fn new(id: PeerId, writer: PeerWriter) -> Self {
        Self {
            id,
            label: format!("Client {id}"),
            writer: AsyncMutex::new(writer),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Display label used as the origin prefix of relayed messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Writes the whole payload to this peer and flushes it.
    pub async fn send(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(payload).await?;
        writer.flush().await
    }

    /// Shuts down the write half so the remote side observes end of stream.
    pub async fn close(&self) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Thread-safe set of live peers.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<HashMap<PeerId, Arc<Peer>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Returns `false` and leaves the set untouched if the id is
    /// already registered.
    pub fn register(&self, peer: Arc<Peer>) -> bool {
        let mut peers = self.lock();
        if peers.contains_key(&peer.id()) {
            return false;
        }
        peers.insert(peer.id(), peer);
        true
    }

    /// Removes a peer if present. Calling this twice for the same id is harmless;
    /// the second call returns `None`.
    pub fn unregister(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.lock().remove(&id)
    }

    /// Copies out every registered peer except `exclude`.
    ///
    /// The copy is consistent at the moment it is taken but may be stale by the
    /// time the caller writes to it.
    pub fn snapshot_excluding(&self, exclude: Option<PeerId>) -> Vec<Arc<Peer>> {
        self.lock()
            .values()
            .filter(|peer| Some(peer.id()) != exclude)
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, Arc<Peer>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
