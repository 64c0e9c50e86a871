use std::{net::IpAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::relay::RelayConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, rebroadcasting every received chunk to the other peers.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Address to bind the listening socket to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Give up on a write to a single peer after this many milliseconds.
    /// Without it, a stalled peer delays the rest of a broadcast indefinitely.
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            write_timeout: self.write_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host name or address of the relay.
    pub host: String,

    /// Port the relay listens on.
    pub port: u16,
}
