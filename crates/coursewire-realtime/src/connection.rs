// Per-connection state
//
// Owned exclusively by the connection's task after a successful handshake.
// The subscription is fixed for the connection's lifetime; the two cursors
// only ever move forward.

use coursewire_core::{AuthenticatedUser, Subscription};

use crate::handshake::Accepted;

#[derive(Debug)]
pub struct ConnectionState {
    pub id: u64,
    pub user: AuthenticatedUser,
    pub subscription: Subscription,
    /// Highest change-log id already shown to this connection.
    pub change_cursor: i64,
    /// Highest TA-assignment ordering key already shown.
    pub ta_cursor: i64,
}

impl ConnectionState {
    pub fn new(id: u64, accepted: Accepted) -> Self {
        Self {
            id,
            user: accepted.user,
            subscription: accepted.subscription,
            change_cursor: accepted.change_cursor,
            ta_cursor: accepted.ta_cursor,
        }
    }
}
