//! Database Infrastructure Layer
//!
//! Handles database connection, schema initialization, and provides
//! data transfer objects (DTOs) for mapping between database rows and domain models.
//!
//! This layer is responsible ONLY for database concerns - no business logic.

use std::{ops::Deref, str::FromStr};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use thiserror::Error;
use tracing::info;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(sqlx::Error),
    #[error("Database query error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl DatabaseError {
    /// True when a write was rejected by a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::Query(sqlx::Error::Database(err)) => err.is_unique_violation(),
            _ => false,
        }
    }

    /// Name of the violated constraint as reported by SQLite, e.g.
    /// `UNIQUE constraint failed: stages.gateway_id, stages.name`.
    pub fn constraint_message(&self) -> Option<String> {
        match self {
            DatabaseError::Query(sqlx::Error::Database(err)) => Some(err.message().to_string()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

// ============================================================================
// Row DTOs
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GatewayRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageRow {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub description_en: Option<String>,
    pub vars: String,
    pub status: String,
    pub micro_gateway_id: Option<String>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackendRow {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackendConfigRow {
    pub id: i64,
    pub gateway_id: i64,
    pub backend_id: i64,
    pub stage_id: i64,
    pub config: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PluginBindingRow {
    pub id: i64,
    pub scope_id: i64,
    pub config_id: i64,
    pub yaml: String,
    pub created_by: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageReleaseRow {
    pub id: i64,
    pub name: String,
    pub resource_version: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Deref for Database {
    type Target = SqlitePool;
    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let database_config = SqliteConnectOptions::from_str(database_url)
            .map_err(DatabaseError::Connection)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(database_config);

        let db = Self { pool };
        db.initialize_tables().await?;

        info!("Database initialized at {}", database_url);
        Ok(db)
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every new `:memory:` connection would be a fresh, empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DatabaseError::Connection)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DatabaseError::Connection)?;

        let db = Self { pool };
        db.initialize_tables().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gateways (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS micro_gateways (
                id TEXT PRIMARY KEY,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // status is only ever changed by the release process
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                description_en TEXT,
                vars TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'draft',
                micro_gateway_id TEXT UNIQUE REFERENCES micro_gateways(id) ON DELETE SET NULL,
                created_by TEXT NOT NULL DEFAULT '',
                updated_by TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (gateway_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backends (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (gateway_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backend_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                backend_id INTEGER NOT NULL REFERENCES backends(id) ON DELETE CASCADE,
                stage_id INTEGER NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (gateway_id, backend_id, stage_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plugin_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                type_code TEXT NOT NULL,
                yaml TEXT NOT NULL,
                created_by TEXT NOT NULL DEFAULT '',
                updated_by TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (gateway_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plugin_bindings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                scope_type TEXT NOT NULL,
                scope_id INTEGER NOT NULL,
                type_code TEXT NOT NULL,
                config_id INTEGER NOT NULL REFERENCES plugin_configs(id) ON DELETE CASCADE,
                created_by TEXT NOT NULL DEFAULT '',
                updated_by TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (gateway_id, scope_type, scope_id, type_code)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Written by the release process, read here for stage listings
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id INTEGER NOT NULL REFERENCES gateways(id) ON DELETE CASCADE,
                stage_id INTEGER NOT NULL UNIQUE REFERENCES stages(id) ON DELETE CASCADE,
                resource_version TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stages_gateway ON stages(gateway_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_backend_configs_stage ON backend_configs(stage_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_plugin_bindings_scope ON plugin_bindings(gateway_id, scope_type, scope_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_schema_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        // Second run must not fail on existing tables
        db.initialize_tables().await.unwrap();

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('stages', 'backends', 'backend_configs', 'plugin_bindings')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_unique_violation_detected() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("INSERT INTO gateways (name) VALUES ('demo')")
            .execute(db.pool())
            .await
            .unwrap();

        let err: DatabaseError = sqlx::query("INSERT INTO gateways (name) VALUES ('demo')")
            .execute(db.pool())
            .await
            .unwrap_err()
            .into();

        assert!(err.is_unique_violation());
        assert!(err.constraint_message().unwrap().contains("gateways.name"));
    }
}
