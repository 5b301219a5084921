// Coursewire realtime notification server
//
// A standalone process that upgrades raw TCP connections to WebSocket
// (hand-rolled handshake and framing), authenticates them against the HTTP
// tier's session store, and bridges the relational change-log and
// ta_assignments tables into per-connection event streams via rate-limited
// polling.

pub mod config;
pub mod connection;
pub mod handshake;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod server;

pub use config::Config;
pub use server::{RealtimeServer, Stores, CHANGE_POLL_INTERVAL, TA_POLL_INTERVAL};
