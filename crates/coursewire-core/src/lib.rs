// Core realtime abstractions for Coursewire
//
// This crate is DB-agnostic: the channel/subscription/cursor semantics live
// here, and the server consumes the surrounding system through the traits in
// `traits` (Postgres implementations are in coursewire-storage, in-memory
// ones in `memory`).

pub mod channel;
pub mod error;
pub mod event;
pub mod memory;
pub mod subscription;
pub mod traits;

pub use channel::Channel;
pub use error::{RealtimeError, Result};
pub use event::{ChangeEvent, TaAssignmentEvent, TaEventRow, WireMessage};
pub use subscription::Subscription;
pub use traits::{
    AuthenticatedUser, ChangeLogSource, SessionStore, TaAssignmentSource, CHANGE_POLL_LIMIT,
    TA_POLL_LIMIT,
};
