// Core traits for pluggable backends
//
// These traits let the server run against different backends:
// - Postgres implementations in coursewire-storage for production
// - In-memory implementations in this crate for tests and examples

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{ChangeEvent, TaEventRow};
use crate::subscription::Subscription;

/// Maximum change-log rows fetched per poll; bounds catch-up burst size.
pub const CHANGE_POLL_LIMIT: i64 = 100;

/// Maximum TA-assignment rows fetched per poll.
pub const TA_POLL_LIMIT: i64 = 20;

/// The user record a session resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

// ============================================================================
// SessionStore - authenticates connections against the HTTP tier's sessions
// ============================================================================

/// Lookup into the session mechanism the HTTP tier uses.
///
/// The realtime server never writes sessions; it only needs
/// `lookup(session_id) -> user-or-absent`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn lookup(&self, session_id: &str) -> Result<Option<AuthenticatedUser>>;
}

// ============================================================================
// ChangeLogSource - the append-only change_log table
// ============================================================================

/// Read-only view of the change log written by the CRUD request handlers.
#[async_trait]
pub trait ChangeLogSource: Send + Sync {
    /// Rows with id strictly greater than `cursor` that match the
    /// subscription's channel subset and scope filters, ordered by id
    /// ascending, capped at `limit`.
    async fn fetch_since(
        &self,
        cursor: i64,
        subscription: &Subscription,
        limit: i64,
    ) -> Result<Vec<ChangeEvent>>;
}

// ============================================================================
// TaAssignmentSource - the ta_assignments table
// ============================================================================

/// Read-only view of TA assignments, scoped to one student.
#[async_trait]
pub trait TaAssignmentSource: Send + Sync {
    /// Rows for `student_user_id` whose ordering key is strictly greater
    /// than `cursor`, ordered ascending, capped at `limit`.
    async fn fetch_since(
        &self,
        cursor: i64,
        student_user_id: i64,
        limit: i64,
    ) -> Result<Vec<TaEventRow>>;
}
