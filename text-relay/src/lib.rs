//! Minimal real-time text relay.
//!
//! A server accepts TCP connections and rebroadcasts every chunk a peer sends
//! to all other connected peers, tagged with the sender's label. There is no
//! framing: each relayed write is whatever one read returned, prefixed with
//! `"Client <id>: "`.
//!
//! - [`registry`] holds the set of live peers behind a single lock.
//! - [`relay`] fans a payload out to a snapshot of that set.
//! - [`session`] runs one peer's read loop and its teardown.
//! - [`server`] binds the listener and starts a session per connection.
//! - [`client`] is the interactive terminal client.
//! - [`cli`] parses the command line for both modes.

pub mod cli;
pub mod client;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
