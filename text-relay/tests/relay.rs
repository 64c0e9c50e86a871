use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use text_relay::{registry::Registry, server::Server};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(150);

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestRelay {
    async fn start() -> Result<Self> {
        let server = Server::bind("127.0.0.1:0").await?;
        let addr = server.local_addr()?;
        let registry = Arc::clone(server.registry());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = server.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Connects a client and waits until the relay has registered it.
    async fn connect(&self) -> Result<TcpStream> {
        let before = self.registry.len();
        let stream = TcpStream::connect(self.addr).await?;
        self.wait_for_len(before + 1).await?;
        Ok(stream)
    }

    async fn wait_for_len(&self, expected: usize) -> Result<()> {
        let waited = timeout(READ_TIMEOUT, async {
            while self.registry.len() != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if waited.is_err() {
            bail!(
                "registry has {} peers, expected {expected}",
                self.registry.len()
            );
        }
        Ok(())
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Result<String> {
    let mut buf = vec![0; len];
    timeout(READ_TIMEOUT, stream.read_exact(&mut buf)).await??;
    Ok(String::from_utf8(buf)?)
}

async fn read_until_suffix(stream: &mut TcpStream, suffix: &str) -> Result<String> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while !received.ends_with(suffix.as_bytes()) {
        let n = timeout(READ_TIMEOUT, stream.read(&mut buf)).await??;
        if n == 0 {
            bail!("stream closed before {suffix:?} arrived");
        }
        received.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8(received)?)
}

async fn assert_silent(stream: &mut TcpStream) -> Result<()> {
    let mut buf = [0u8; 256];
    match timeout(QUIET_PERIOD, stream.read(&mut buf)).await {
        Err(_) => Ok(()),
        Ok(Ok(n)) => bail!(
            "expected no traffic, got {:?}",
            String::from_utf8_lossy(&buf[..n])
        ),
        Ok(Err(err)) => Err(err.into()),
    }
}

// Tests in this binary share the id counter, so labels are learned from the
// relayed traffic rather than predicted.
fn label_of(message: &str) -> Result<&str> {
    match message.split_once(": ") {
        Some((label, _)) => Ok(label),
        None => bail!("message {message:?} has no origin label"),
    }
}

#[tokio::test]
async fn message_reaches_other_peer_but_not_sender() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;

    alice.write_all(b"Hello everyone!").await?;

    let received = read_until_suffix(&mut bob, "Hello everyone!").await?;
    let label = label_of(&received)?;
    assert!(label.starts_with("Client "), "unexpected label {label:?}");
    assert_eq!(received, format!("{label}: Hello everyone!"));
    assert_silent(&mut alice).await?;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn abrupt_close_announces_departure_once() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;

    alice.write_all(b"bye").await?;
    let greeting = read_until_suffix(&mut bob, "bye").await?;
    let alice_label = label_of(&greeting)?.to_string();

    drop(alice);
    let notice = format!("{alice_label} has left the chat.");
    assert_eq!(read_exactly(&mut bob, notice.len()).await?, notice);
    relay.wait_for_len(1).await?;
    assert_silent(&mut bob).await?;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn lone_peer_sends_into_the_void() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut bob = relay.connect().await?;

    bob.write_all(b"anyone there?").await?;
    assert_silent(&mut bob).await?;

    // The relay keeps accepting afterwards.
    let mut carol = relay.connect().await?;
    bob.write_all(b"hi carol").await?;
    let received = read_until_suffix(&mut carol, "hi carol").await?;
    assert!(received.starts_with("Client "));

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn every_peer_hears_every_other_peer() -> Result<()> {
    const PEERS: usize = 5;
    let relay = TestRelay::start().await?;

    let mut streams = Vec::with_capacity(PEERS);
    for _ in 0..PEERS {
        streams.push(relay.connect().await?);
    }

    // One sender at a time keeps chunks from coalescing across senders.
    for sender in 0..PEERS {
        let text = format!("message from peer {sender}");
        streams[sender].write_all(text.as_bytes()).await?;

        for (receiver, stream) in streams.iter_mut().enumerate() {
            if receiver == sender {
                continue;
            }
            let received = read_until_suffix(stream, &text).await?;
            assert_eq!(received, format!("{}: {text}", label_of(&received)?));
        }
        assert_silent(&mut streams[sender]).await?;
    }

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn departed_peer_receives_nothing_further() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;
    let mut carol = relay.connect().await?;

    alice.shutdown().await?;
    let notice_for_bob = read_until_suffix(&mut bob, "has left the chat.").await?;
    let notice_for_carol = read_until_suffix(&mut carol, "has left the chat.").await?;
    assert_eq!(notice_for_bob, notice_for_carol);
    relay.wait_for_len(2).await?;

    bob.write_all(b"after").await?;
    read_until_suffix(&mut carol, "after").await?;

    // Alice's read side sees only the relay closing her connection.
    let mut rest = Vec::new();
    timeout(READ_TIMEOUT, alice.read_to_end(&mut rest)).await??;
    assert!(rest.is_empty());

    relay.stop().await;
    Ok(())
}
