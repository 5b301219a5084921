// Schema capability probing
//
// The surrounding schema varies across deployments: the change_log table may
// or may not carry the optional payload column, and the ta_assignments table
// may use different primary keys (or none). Capabilities are resolved ONCE at
// startup into an immutable descriptor; query construction branches on the
// descriptor, never on per-request probing.

use anyhow::{Context, Result};
use tracing::warn;

use crate::repositories::Database;

/// Conventional ordering column used when the table declares no usable key.
const TA_FALLBACK_COLUMN: &str = "ta_assignment_id";

/// How TA-assignment rows are ordered and cursored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaOrderKey {
    /// A declared primary/unique key column, or the conventional fallback.
    Column(String),
    /// No usable key: a synthetic monotonic expression combining the start
    /// timestamp and the queue id.
    Synthetic,
    /// The table does not exist in this deployment; the TA poller is a no-op.
    Unavailable,
}

/// Immutable snapshot of the optional schema features, resolved at startup.
#[derive(Debug, Clone)]
pub struct SchemaCapabilities {
    /// Whether change_log has the optional payload_json column.
    pub change_log_payload: bool,
    pub ta_order_key: TaOrderKey,
}

impl SchemaCapabilities {
    pub async fn probe(db: &Database) -> Result<Self> {
        let change_log_payload = column_exists(db, "change_log", "payload_json")
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "payload column probe failed; assuming absent");
                false
            });

        let ta_order_key = if table_exists(db, "ta_assignments")
            .await
            .context("probing ta_assignments table")?
        {
            let declared = declared_key_column(db, "ta_assignments").await?;
            let has_fallback = column_exists(db, "ta_assignments", TA_FALLBACK_COLUMN).await?;
            resolve_ta_order_key(declared, has_fallback)
        } else {
            TaOrderKey::Unavailable
        };

        Ok(Self {
            change_log_payload,
            ta_order_key,
        })
    }
}

/// Pick the TA ordering key from what the probe found. A declared key is
/// only trusted when it is a plain lower-case identifier, since it is
/// interpolated into query text.
fn resolve_ta_order_key(declared: Option<String>, has_fallback: bool) -> TaOrderKey {
    if let Some(column) = declared {
        if is_safe_identifier(&column) {
            return TaOrderKey::Column(column);
        }
        warn!(%column, "ignoring unusable key column name");
    }
    if has_fallback {
        return TaOrderKey::Column(TA_FALLBACK_COLUMN.to_string());
    }
    TaOrderKey::Synthetic
}

/// Identifiers interpolated into SQL must be plain snake_case names.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit()
}

async fn table_exists(db: &Database, table: &str) -> Result<bool> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = current_schema() AND table_name = $1
        LIMIT 1
        "#,
    )
    .bind(table)
    .fetch_optional(db.pool())
    .await?;

    Ok(row.is_some())
}

async fn column_exists(db: &Database, table: &str, column: &str) -> Result<bool> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT 1
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
        LIMIT 1
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_optional(db.pool())
    .await?;

    Ok(row.is_some())
}

/// First declared primary-key column, falling back to the first unique-key
/// column, in constraint declaration order.
async fn declared_key_column(db: &Database, table: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT kcu.column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON kcu.constraint_name = tc.constraint_name
         AND kcu.table_schema = tc.table_schema
        WHERE tc.table_schema = current_schema()
          AND tc.table_name = $1
          AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
        ORDER BY CASE tc.constraint_type WHEN 'PRIMARY KEY' THEN 0 ELSE 1 END,
                 kcu.ordinal_position
        LIMIT 1
        "#,
    )
    .bind(table)
    .fetch_optional(db.pool())
    .await?;

    Ok(row.map(|(column,)| column))
}
