// Per-connection polling
//
// Bridges the shared relational tables into this connection's event stream.
// A failed poll yields nothing and leaves the cursor where it was, so the
// next tick retries the same range; the fixed poll interval already
// rate-limits retries.

use tracing::{debug, warn};

use coursewire_core::{ChangeLogSource, TaAssignmentSource, CHANGE_POLL_LIMIT, TA_POLL_LIMIT};

use crate::connection::ConnectionState;

/// Poll the change log once for this connection. Returns the serialized
/// wire messages to push, advancing the cursor per consumed row in result
/// order.
pub async fn poll_change_log(
    conn: &mut ConnectionState,
    source: &dyn ChangeLogSource,
) -> Vec<String> {
    if conn.subscription.change_channels().is_empty() {
        return Vec::new();
    }

    let events = match source
        .fetch_since(conn.change_cursor, &conn.subscription, CHANGE_POLL_LIMIT)
        .await
    {
        Ok(events) => events,
        Err(e) => {
            warn!(
                id = conn.id,
                user_id = conn.user.user_id,
                error = %e,
                "change-log poll failed; retrying next tick"
            );
            return Vec::new();
        }
    };

    let mut messages = Vec::with_capacity(events.len());
    for event in events {
        if event.id <= conn.change_cursor {
            continue;
        }
        conn.change_cursor = event.id;
        match serde_json::to_string(&event.into_message()) {
            Ok(json) => messages.push(json),
            Err(e) => debug!(error = %e, "dropping unserializable change event"),
        }
    }
    messages
}

/// Poll TA assignments once for this connection. Only runs for ta_accept
/// subscribers, and only ever yields rows for the authenticated student.
pub async fn poll_ta_assignments(
    conn: &mut ConnectionState,
    source: &dyn TaAssignmentSource,
) -> Vec<String> {
    if !conn.subscription.ta_enabled() || conn.user.user_id <= 0 {
        return Vec::new();
    }

    let rows = match source
        .fetch_since(conn.ta_cursor, conn.user.user_id, TA_POLL_LIMIT)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            warn!(
                id = conn.id,
                user_id = conn.user.user_id,
                error = %e,
                "ta-assignment poll failed; retrying next tick"
            );
            return Vec::new();
        }
    };

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        if row.event_id <= conn.ta_cursor {
            continue;
        }
        conn.ta_cursor = row.event_id;
        match serde_json::to_string(&row.event.into_message()) {
            Ok(json) => messages.push(json),
            Err(e) => debug!(error = %e, "dropping unserializable ta event"),
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coursewire_core::memory::{InMemoryChangeLog, InMemoryTaAssignments};
    use coursewire_core::{
        AuthenticatedUser, Channel, ChangeEvent, RealtimeError, Result, Subscription,
        TaAssignmentEvent, TaEventRow,
    };

    fn connection(subscription: Subscription, user_id: i64) -> ConnectionState {
        ConnectionState {
            id: 1,
            user: AuthenticatedUser {
                user_id,
                name: "Dana".to_string(),
                role: None,
            },
            subscription,
            change_cursor: 0,
            ta_cursor: 0,
        }
    }

    fn change(id: i64, channel: Channel, ref_id: i64) -> ChangeEvent {
        ChangeEvent {
            id,
            channel,
            ref_id: Some(ref_id),
            course_id: None,
            ts: Some(1_700_000_000 + id),
            payload: None,
        }
    }

    fn ta_row(event_id: i64, student: i64) -> TaEventRow {
        TaEventRow {
            event_id,
            event: TaAssignmentEvent {
                queue_id: Some(4),
                user_id: Some(student),
                ta_user_id: Some(2),
                ta_name: "Sam".to_string(),
                started_at: None,
                assignment_id: Some(event_id),
            },
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ChangeLogSource for FailingSource {
        async fn fetch_since(
            &self,
            _cursor: i64,
            _subscription: &Subscription,
            _limit: i64,
        ) -> Result<Vec<ChangeEvent>> {
            Err(RealtimeError::source("connection refused"))
        }
    }

    #[async_trait]
    impl TaAssignmentSource for FailingSource {
        async fn fetch_since(
            &self,
            _cursor: i64,
            _student_user_id: i64,
            _limit: i64,
        ) -> Result<Vec<TaEventRow>> {
            Err(RealtimeError::source("connection refused"))
        }
    }

    #[tokio::test]
    async fn cursor_never_regresses_and_tracks_max_delivered() {
        let log = InMemoryChangeLog::new();
        log.append_all(vec![
            change(99, Channel::Rooms, 1),
            change(100, Channel::Rooms, 1),
            change(101, Channel::Rooms, 1),
            change(104, Channel::Rooms, 1),
        ])
        .await;

        let mut conn = connection(Subscription::new([Channel::Rooms].into()), 7);
        conn.change_cursor = 100;

        let messages = poll_change_log(&mut conn, &log).await;
        assert_eq!(messages.len(), 2);
        for message in &messages {
            let value: serde_json::Value = serde_json::from_str(message).unwrap();
            assert!(value["data"]["id"].as_i64().unwrap() > 100);
        }
        assert_eq!(conn.change_cursor, 104);

        // nothing new: no messages, cursor parked
        let messages = poll_change_log(&mut conn, &log).await;
        assert!(messages.is_empty());
        assert_eq!(conn.change_cursor, 104);
    }

    #[tokio::test]
    async fn progress_only_connection_never_sees_other_channels() {
        let log = InMemoryChangeLog::new();
        log.append_all(vec![
            change(1, Channel::Rooms, 1),
            change(2, Channel::Progress, 1),
            change(3, Channel::Queue, 9),
        ])
        .await;

        let mut conn = connection(Subscription::new([Channel::Progress].into()), 7);
        let messages = poll_change_log(&mut conn, &log).await;
        assert_eq!(messages.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["event"], "progress");
        // cursor follows the filtered result set, not the whole table
        assert_eq!(conn.change_cursor, 2);
    }

    #[tokio::test]
    async fn room_scope_gates_queue_events_only() {
        let log = InMemoryChangeLog::new();
        log.append_all(vec![
            change(1, Channel::Rooms, 7),
            change(2, Channel::Progress, 7),
            change(3, Channel::Queue, 7),
            change(4, Channel::Queue, 5),
        ])
        .await;

        let subscription =
            Subscription::new([Channel::Rooms, Channel::Progress, Channel::Queue].into())
                .with_room(Some(5));
        let mut conn = connection(subscription, 7);
        let messages = poll_change_log(&mut conn, &log).await;
        let events: Vec<String> = messages
            .iter()
            .map(|m| {
                let value: serde_json::Value = serde_json::from_str(m).unwrap();
                format!(
                    "{}:{}",
                    value["event"].as_str().unwrap(),
                    value["data"]["id"]
                )
            })
            .collect();
        assert_eq!(events, vec!["rooms:1", "progress:2", "queue:4"]);
    }

    #[tokio::test]
    async fn queue_filter_drops_foreign_refs_and_cursor_skips_them() {
        // the end-to-end scenario: cursor 100, rows 101 (ref 42) and 102 (ref 43)
        let log = InMemoryChangeLog::new();
        log.append_all(vec![
            change(101, Channel::Queue, 42),
            change(102, Channel::Queue, 43),
        ])
        .await;

        let subscription = Subscription::new([Channel::Queue].into()).with_queues(vec![42]);
        let mut conn = connection(subscription, 7);
        conn.change_cursor = 100;

        let messages = poll_change_log(&mut conn, &log).await;
        assert_eq!(messages.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["data"]["id"], 101);
        assert_eq!(value["data"]["ref_id"], 42);
        // id=102 was filtered out at the source, so the cursor stays at 101
        assert_eq!(conn.change_cursor, 101);
    }

    #[tokio::test]
    async fn ta_poll_only_returns_the_connections_student() {
        let source = InMemoryTaAssignments::new();
        source.append(7, ta_row(1, 7)).await;
        source.append(8, ta_row(2, 8)).await;

        let mut conn = connection(Subscription::new([Channel::TaAccept].into()), 7);
        let messages = poll_ta_assignments(&mut conn, &source).await;
        assert_eq!(messages.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["event"], "ta_accept");
        assert_eq!(value["data"]["user_id"], 7);
        assert_eq!(conn.ta_cursor, 1);
    }

    #[tokio::test]
    async fn ta_poll_requires_subscription() {
        let source = InMemoryTaAssignments::new();
        source.append(7, ta_row(1, 7)).await;

        let mut conn = connection(Subscription::new([Channel::Rooms].into()), 7);
        assert!(poll_ta_assignments(&mut conn, &source).await.is_empty());
        assert_eq!(conn.ta_cursor, 0);
    }

    #[tokio::test]
    async fn failed_polls_leave_cursors_untouched() {
        let mut conn = connection(
            Subscription::new([Channel::Rooms, Channel::TaAccept].into()),
            7,
        );
        conn.change_cursor = 5;
        conn.ta_cursor = 3;

        assert!(poll_change_log(&mut conn, &FailingSource).await.is_empty());
        assert!(poll_ta_assignments(&mut conn, &FailingSource).await.is_empty());
        assert_eq!(conn.change_cursor, 5);
        assert_eq!(conn.ta_cursor, 3);
    }
}
