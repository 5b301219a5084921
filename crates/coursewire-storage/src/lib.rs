// Postgres storage layer with sqlx
//
// This crate provides database implementations for core traits:
// - DbSessionStore: implements SessionStore against the HTTP tier's sessions
// - DbChangeLogSource: implements ChangeLogSource over the change_log table
// - DbTaAssignmentSource: implements TaAssignmentSource over ta_assignments

pub mod capabilities;
pub mod change_log;
pub mod repositories;
pub mod sessions;
pub mod ta_assignments;

pub use capabilities::{SchemaCapabilities, TaOrderKey};
pub use change_log::DbChangeLogSource;
pub use repositories::Database;
pub use sessions::DbSessionStore;
pub use ta_assignments::DbTaAssignmentSource;
