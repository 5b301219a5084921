// Realtime channel enumeration
//
// Clients subscribe to a fixed set of named channels. Three of them are fed
// from the shared change_log table; ta_accept is fed from the ta_assignments
// table and is scoped to the authenticated student.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named category of realtime event a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Rooms,
    Progress,
    Queue,
    TaAccept,
}

impl Channel {
    /// Every channel a client may request, in canonical order.
    pub const ALL: [Channel; 4] = [
        Channel::Rooms,
        Channel::Progress,
        Channel::Queue,
        Channel::TaAccept,
    ];

    /// Channels delivered through the change-log poller.
    pub const CHANGE_LOG: [Channel; 3] = [Channel::Rooms, Channel::Progress, Channel::Queue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Rooms => "rooms",
            Channel::Progress => "progress",
            Channel::Queue => "queue",
            Channel::TaAccept => "ta_accept",
        }
    }

    /// Parse a channel name. Matching is exact against the lower-case names;
    /// callers lower-case client input first.
    pub fn parse(name: &str) -> Option<Channel> {
        match name {
            "rooms" => Some(Channel::Rooms),
            "progress" => Some(Channel::Progress),
            "queue" => Some(Channel::Queue),
            "ta_accept" => Some(Channel::TaAccept),
            _ => None,
        }
    }

    /// Whether events on this channel flow from the change_log table.
    pub fn is_change_log(&self) -> bool {
        !matches!(self, Channel::TaAccept)
    }

    /// Channels whose events are keyed by a queue id rather than a room id.
    /// The room scope filter only gates these by reference id.
    pub fn is_queue_scoped(&self) -> bool {
        matches!(self, Channel::Queue | Channel::TaAccept)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_channel() {
        for channel in Channel::ALL {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
    }

    #[test]
    fn parse_rejects_unknown_and_uppercase() {
        assert_eq!(Channel::parse("grades"), None);
        assert_eq!(Channel::parse("ROOMS"), None);
        assert_eq!(Channel::parse(""), None);
    }

    #[test]
    fn serializes_as_wire_name() {
        let json = serde_json::to_string(&Channel::TaAccept).unwrap();
        assert_eq!(json, "\"ta_accept\"");
    }

    #[test]
    fn queue_scoping_matches_room_filter_contract() {
        assert!(Channel::Queue.is_queue_scoped());
        assert!(Channel::TaAccept.is_queue_scoped());
        assert!(!Channel::Rooms.is_queue_scoped());
        assert!(!Channel::Progress.is_queue_scoped());
    }
}
