use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
};
use tracing::{info, warn};

use crate::{
    registry::{Peer, PeerId, Registry},
    relay::{Relay, RelayConfig},
    session::Session,
};

/// Accepts connections and hands each one to its own session task.
pub struct Server {
    listener: TcpListener,
    relay: Relay,
}

impl Server {
    /// Binds the listening socket. Failing here is fatal to startup.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::bind_with_config(addr, RelayConfig::default()).await
    }

    pub async fn bind_with_config<A: ToSocketAddrs>(addr: A, config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind listening socket")?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            relay: Relay::new(Arc::new(Registry::new()), config),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.relay.registry()
    }

    /// Accepts connections until the process ends.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Sessions already running
    /// are left alone.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, relay } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay stopped accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &relay);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Registers a freshly connected transport and starts its session.
    pub fn on_accept<R, W>(&self, reader: R, writer: W) -> PeerId
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        on_accept(&self.relay, reader, writer)
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, relay: &Relay) {
    match result {
        Ok((stream, addr)) => {
            let (reader, writer) = stream.into_split();
            let id = on_accept(relay, reader, writer);
            info!(peer = %addr, id = %id, "new client connected");
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn on_accept<R, W>(relay: &Relay, reader: R, writer: W) -> PeerId
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let peer = Arc::new(Peer::new(PeerId::next(), Box::new(writer)));
    relay.registry().register(Arc::clone(&peer));

    let session = Session::new(relay.clone(), Arc::clone(&peer), reader);
    tokio::spawn(session.run());
    peer.id()
}
