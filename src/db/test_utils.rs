//! Shared test utilities for database operations
//!
//! Provides a common test_pool() function so store tests run against the
//! same migrated schema as production.

use sqlx::SqlitePool;

use super::Database;

/// Create an in-memory test database pool with full schema
pub async fn test_pool() -> SqlitePool {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.pool().clone()
}
