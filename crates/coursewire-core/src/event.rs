// Wire event types
//
// Everything the server pushes to a client is a JSON text frame of shape
// {"type":"event","event":"<channel>","data":{...}}. The data object is one
// of the two event kinds below, mapped straight from a polled row.

use crate::channel::Channel;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A change-log row as delivered to a subscribed connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Monotonically increasing row id; the ordering and dedup key.
    pub id: i64,
    pub channel: Channel,
    /// Meaning depends on the channel (a room id or a queue id).
    pub ref_id: Option<i64>,
    pub course_id: Option<i64>,
    /// Unix timestamp of the row's created_at.
    pub ts: Option<i64>,
    /// Present only when the deployment's change_log table has the optional
    /// payload column and the stored text is non-empty valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// A TA-assignment row as delivered to the student it concerns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaAssignmentEvent {
    pub queue_id: Option<i64>,
    /// The student's user id; always the connection's authenticated user.
    pub user_id: Option<i64>,
    pub ta_user_id: Option<i64>,
    pub ta_name: String,
    pub started_at: Option<DateTime<Utc>>,
    /// The table's native key value when one exists, else null.
    pub assignment_id: Option<i64>,
}

/// A TA row paired with its ordering key. The key is the resolved native key
/// when the table has one, else the synthetic timestamp+queue expression, so
/// it cannot double as `assignment_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaEventRow {
    pub event_id: i64,
    pub event: TaAssignmentEvent,
}

/// The envelope every server-to-client message is wrapped in.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage<T: Serialize> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: Channel,
    pub data: T,
}

impl ChangeEvent {
    pub fn into_message(self) -> WireMessage<ChangeEvent> {
        WireMessage {
            kind: "event",
            event: self.channel,
            data: self,
        }
    }
}

impl TaAssignmentEvent {
    pub fn into_message(self) -> WireMessage<TaAssignmentEvent> {
        WireMessage {
            kind: "event",
            event: Channel::TaAccept,
            data: self,
        }
    }
}
