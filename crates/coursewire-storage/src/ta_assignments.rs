// TA-assignment poll queries
//
// The ordering/cursor column is whatever the capability probe resolved: a
// declared key, the conventional ta_assignment_id column, or a synthetic
// monotonic expression when the table has no usable key at all. The resolved
// statement is built once at construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use coursewire_core::{RealtimeError, Result, TaAssignmentEvent, TaAssignmentSource, TaEventRow};

use crate::capabilities::{SchemaCapabilities, TaOrderKey};
use crate::repositories::Database;

/// Synthetic ordering expression for key-less deployments: millisecond start
/// time plus the queue id keeps concurrent assignments distinct and ordered.
const SYNTHETIC_KEY_EXPR: &str =
    "(EXTRACT(EPOCH FROM ta.started_at)::BIGINT * 1000 + ta.queue_id)";

pub struct DbTaAssignmentSource {
    pool: PgPool,
    /// None when the table is absent; the poller then yields nothing.
    query: Option<String>,
    /// Whether event ids are native key values usable as assignment ids.
    native_key: bool,
}

impl DbTaAssignmentSource {
    pub fn new(db: &Database, capabilities: &SchemaCapabilities) -> Self {
        let (query, native_key) = match &capabilities.ta_order_key {
            TaOrderKey::Column(column) => (Some(build_column_query(column)), true),
            TaOrderKey::Synthetic => (Some(build_synthetic_query()), false),
            TaOrderKey::Unavailable => (None, false),
        };
        Self {
            pool: db.pool().clone(),
            query,
            native_key,
        }
    }
}

fn build_column_query(column: &str) -> String {
    format!(
        "SELECT ta.{column}::BIGINT AS event_id, ta.queue_id, ta.student_user_id, \
                ta.ta_user_id, ta.started_at, tu.name AS ta_name \
         FROM ta_assignments ta \
         JOIN users tu ON tu.user_id = ta.ta_user_id \
         WHERE ta.student_user_id = $1 AND ta.{column}::BIGINT > $2 \
         ORDER BY ta.{column} ASC \
         LIMIT $3"
    )
}

fn build_synthetic_query() -> String {
    format!(
        "SELECT {SYNTHETIC_KEY_EXPR}::BIGINT AS event_id, ta.queue_id, ta.student_user_id, \
                ta.ta_user_id, ta.started_at, tu.name AS ta_name \
         FROM ta_assignments ta \
         JOIN users tu ON tu.user_id = ta.ta_user_id \
         WHERE ta.student_user_id = $1 AND {SYNTHETIC_KEY_EXPR} > $2 \
         ORDER BY ta.started_at ASC \
         LIMIT $3"
    )
}

#[derive(sqlx::FromRow)]
struct TaRow {
    event_id: Option<i64>,
    queue_id: Option<i64>,
    student_user_id: Option<i64>,
    ta_user_id: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    ta_name: Option<String>,
}

impl TaRow {
    fn into_event_row(self, native_key: bool) -> TaEventRow {
        let event_id = self.event_id.unwrap_or(0);
        TaEventRow {
            event_id,
            event: TaAssignmentEvent {
                queue_id: self.queue_id,
                user_id: self.student_user_id,
                ta_user_id: self.ta_user_id,
                ta_name: self.ta_name.unwrap_or_default(),
                started_at: self.started_at,
                assignment_id: native_key.then_some(event_id),
            },
        }
    }
}

#[async_trait]
impl TaAssignmentSource for DbTaAssignmentSource {
    async fn fetch_since(
        &self,
        cursor: i64,
        student_user_id: i64,
        limit: i64,
    ) -> Result<Vec<TaEventRow>> {
        let Some(query) = &self.query else {
            return Ok(Vec::new());
        };

        let rows: Vec<TaRow> = sqlx::query_as(query)
            .bind(student_user_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RealtimeError::source(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_event_row(self.native_key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_query_orders_and_cursors_on_the_resolved_key() {
        let query = build_column_query("ta_assignment_id");
        assert!(query.contains("ta.ta_assignment_id::BIGINT AS event_id"));
        assert!(query.contains("ta.ta_assignment_id::BIGINT > $2"));
        assert!(query.contains("ORDER BY ta.ta_assignment_id ASC"));
        assert!(query.contains("student_user_id = $1"));
        assert!(query.contains("LIMIT $3"));
    }

    #[test]
    fn synthetic_query_orders_by_start_time() {
        let query = build_synthetic_query();
        assert!(query.contains("EXTRACT(EPOCH FROM ta.started_at)::BIGINT * 1000 + ta.queue_id"));
        assert!(query.contains("ORDER BY ta.started_at ASC"));
    }

    #[test]
    fn native_key_rows_expose_assignment_id() {
        let row = TaRow {
            event_id: Some(31),
            queue_id: Some(4),
            student_user_id: Some(7),
            ta_user_id: Some(2),
            started_at: None,
            ta_name: Some("Sam".to_string()),
        };
        let event_row = row.into_event_row(true);
        assert_eq!(event_row.event_id, 31);
        assert_eq!(event_row.event.assignment_id, Some(31));
    }

    #[test]
    fn synthetic_rows_leave_assignment_id_null() {
        let row = TaRow {
            event_id: Some(1_700_000_000_004),
            queue_id: Some(4),
            student_user_id: Some(7),
            ta_user_id: Some(2),
            started_at: None,
            ta_name: None,
        };
        let event_row = row.into_event_row(false);
        assert_eq!(event_row.event_id, 1_700_000_000_004);
        assert_eq!(event_row.event.assignment_id, None);
        assert_eq!(event_row.event.ta_name, "");
    }
}
