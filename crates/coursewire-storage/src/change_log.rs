// Change-log poll queries
//
// One SELECT per poll, parameterized on the connection's cursor and scope
// filters. The optional scope conditions are encoded as null-tolerant
// predicates so the statement text is fixed for the process lifetime; only
// the SELECT list varies with the payload capability, decided once at
// construction.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use coursewire_core::{Channel, ChangeEvent, ChangeLogSource, RealtimeError, Result, Subscription};

use crate::capabilities::SchemaCapabilities;
use crate::repositories::Database;

pub struct DbChangeLogSource {
    pool: PgPool,
    query: String,
    has_payload: bool,
}

impl DbChangeLogSource {
    pub fn new(db: &Database, capabilities: &SchemaCapabilities) -> Self {
        Self {
            pool: db.pool().clone(),
            query: build_query(capabilities.change_log_payload),
            has_payload: capabilities.change_log_payload,
        }
    }
}

fn build_query(has_payload: bool) -> String {
    let payload_select = if has_payload {
        "payload_json"
    } else {
        "NULL::TEXT AS payload_json"
    };
    format!(
        "SELECT id, channel, ref_id, course_id, \
                EXTRACT(EPOCH FROM created_at)::BIGINT AS ts, {payload_select} \
         FROM change_log \
         WHERE id > $1 \
           AND channel = ANY($2) \
           AND ($3::BIGINT IS NULL OR course_id = $3 OR course_id IS NULL) \
           AND ($4::BIGINT[] IS NULL OR ref_id = ANY($4)) \
           AND ($5::BIGINT IS NULL OR channel NOT IN ('queue', 'ta_accept') OR ref_id = $5) \
         ORDER BY id ASC \
         LIMIT $6"
    )
}

#[derive(sqlx::FromRow)]
struct ChangeLogRow {
    id: i64,
    channel: String,
    ref_id: Option<i64>,
    course_id: Option<i64>,
    ts: Option<i64>,
    payload_json: Option<String>,
}

impl ChangeLogRow {
    fn into_event(self, has_payload: bool) -> Option<ChangeEvent> {
        let Some(channel) = Channel::parse(&self.channel) else {
            debug!(channel = %self.channel, id = self.id, "skipping row with unknown channel");
            return None;
        };
        let payload = if has_payload {
            self.payload_json
                .as_deref()
                .filter(|text| !text.is_empty())
                .and_then(|text| serde_json::from_str(text).ok())
        } else {
            None
        };
        Some(ChangeEvent {
            id: self.id,
            channel,
            ref_id: self.ref_id,
            course_id: self.course_id,
            ts: self.ts,
            payload,
        })
    }
}

#[async_trait]
impl ChangeLogSource for DbChangeLogSource {
    async fn fetch_since(
        &self,
        cursor: i64,
        subscription: &Subscription,
        limit: i64,
    ) -> Result<Vec<ChangeEvent>> {
        let channels: Vec<String> = subscription
            .change_channels()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let queue_ids = if subscription.queue_ids.is_empty() {
            None
        } else {
            Some(subscription.queue_ids.clone())
        };

        let rows: Vec<ChangeLogRow> = sqlx::query_as(&self.query)
            .bind(cursor)
            .bind(&channels)
            .bind(subscription.course_id)
            .bind(queue_ids)
            .bind(subscription.room_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RealtimeError::source(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_event(self.has_payload))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_includes_payload_column_only_when_present() {
        let with = build_query(true);
        assert!(with.contains(", payload_json "));
        assert!(!with.contains("NULL::TEXT"));

        let without = build_query(false);
        assert!(without.contains("NULL::TEXT AS payload_json"));
    }

    #[test]
    fn query_encodes_every_scope_filter() {
        let query = build_query(true);
        assert!(query.contains("id > $1"));
        assert!(query.contains("channel = ANY($2)"));
        assert!(query.contains("course_id = $3 OR course_id IS NULL"));
        assert!(query.contains("ref_id = ANY($4)"));
        assert!(query.contains("channel NOT IN ('queue', 'ta_accept') OR ref_id = $5"));
        assert!(query.contains("ORDER BY id ASC"));
        assert!(query.contains("LIMIT $6"));
    }

    #[test]
    fn row_mapping_keeps_only_valid_payload_json() {
        let row = |payload: Option<&str>| ChangeLogRow {
            id: 5,
            channel: "rooms".to_string(),
            ref_id: Some(2),
            course_id: None,
            ts: Some(1_700_000_123),
            payload_json: payload.map(|s| s.to_string()),
        };

        let event = row(Some(r#"{"k":1}"#)).into_event(true).unwrap();
        assert_eq!(event.payload, Some(serde_json::json!({"k": 1})));

        assert_eq!(row(Some("")).into_event(true).unwrap().payload, None);
        assert_eq!(row(Some("{broken")).into_event(true).unwrap().payload, None);
        assert_eq!(row(None).into_event(true).unwrap().payload, None);
        // capability off: payload ignored even if the driver returned text
        assert_eq!(
            row(Some(r#"{"k":1}"#)).into_event(false).unwrap().payload,
            None
        );
    }

    #[test]
    fn row_mapping_skips_unknown_channel() {
        let row = ChangeLogRow {
            id: 1,
            channel: "mystery".to_string(),
            ref_id: None,
            course_id: None,
            ts: None,
            payload_json: None,
        };
        assert!(row.into_event(true).is_none());
    }
}
