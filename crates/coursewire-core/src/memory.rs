// In-memory implementations for examples and testing
//
// These keep all data in memory and mirror the SQL sources' filter and
// ordering semantics exactly, so poller behavior can be tested without a
// database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::{ChangeEvent, TaEventRow};
use crate::subscription::Subscription;
use crate::traits::{AuthenticatedUser, ChangeLogSource, SessionStore, TaAssignmentSource};

// ============================================================================
// InMemorySessionStore
// ============================================================================

/// Session store backed by a HashMap, seeded by tests.
#[derive(Debug, Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, AuthenticatedUser>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: impl Into<String>, user: AuthenticatedUser) {
        self.sessions.write().await.insert(session_id.into(), user);
    }

    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lookup(&self, session_id: &str) -> Result<Option<AuthenticatedUser>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

// ============================================================================
// InMemoryChangeLog
// ============================================================================

/// Append-only change log backed by a Vec, ordered by id.
#[derive(Debug, Default, Clone)]
pub struct InMemoryChangeLog {
    rows: Arc<RwLock<Vec<ChangeEvent>>>,
}

impl InMemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, event: ChangeEvent) {
        self.rows.write().await.push(event);
    }

    pub async fn append_all(&self, events: Vec<ChangeEvent>) {
        self.rows.write().await.extend(events);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ChangeLogSource for InMemoryChangeLog {
    async fn fetch_since(
        &self,
        cursor: i64,
        subscription: &Subscription,
        limit: i64,
    ) -> Result<Vec<ChangeEvent>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<ChangeEvent> = rows
            .iter()
            .filter(|row| row.id > cursor)
            .filter(|row| subscription.matches(row.channel, row.ref_id, row.course_id))
            .cloned()
            .collect();
        matched.sort_by_key(|row| row.id);
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }
}

// ============================================================================
// InMemoryTaAssignments
// ============================================================================

/// TA-assignment rows keyed by student, ordered by event id.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTaAssignments {
    rows: Arc<RwLock<Vec<(i64, TaEventRow)>>>,
}

impl InMemoryTaAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, student_user_id: i64, row: TaEventRow) {
        self.rows.write().await.push((student_user_id, row));
    }
}

#[async_trait]
impl TaAssignmentSource for InMemoryTaAssignments {
    async fn fetch_since(
        &self,
        cursor: i64,
        student_user_id: i64,
        limit: i64,
    ) -> Result<Vec<TaEventRow>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<TaEventRow> = rows
            .iter()
            .filter(|(student, row)| *student == student_user_id && row.event_id > cursor)
            .map(|(_, row)| row.clone())
            .collect();
        matched.sort_by_key(|row| row.event_id);
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }
}
