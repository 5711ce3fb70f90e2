//! Stores
//!
//! Query functions for gateways, stages, backends and backend configs.
//! Read helpers accept any executor (the pool or an open transaction); write
//! helpers that issue more than one statement take a connection so the whole
//! sequence can run inside the writer's transaction.

use std::collections::BTreeMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use crate::database::{
    BackendConfigRow, BackendRow, DatabaseError, GatewayRow, StageReleaseRow, StageRow,
};
use crate::models::{Backend, BackendConfig, BackendConfigValue, Gateway, Stage};

type Result<T> = std::result::Result<T, DatabaseError>;

fn encode_config(config: &BackendConfigValue) -> Result<String> {
    serde_json::to_string(config)
        .map_err(|e| DatabaseError::InvalidData(format!("Failed to serialize backend config: {}", e)))
}

// ============================================================================
// Gateway Operations
// ============================================================================

pub async fn create_gateway<'e>(executor: impl SqliteExecutor<'e>, name: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO gateways (name) VALUES (?)")
        .bind(name)
        .execute(executor)
        .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_gateway<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<Option<Gateway>> {
    let row = sqlx::query_as::<_, GatewayRow>("SELECT id, name, created_at FROM gateways WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(Gateway::from))
}

pub async fn create_micro_gateway<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    id: Uuid,
    name: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO micro_gateways (id, gateway_id, name) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(gateway_id)
        .bind(name)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn micro_gateway_exists<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    id: Uuid,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM micro_gateways WHERE gateway_id = ? AND id = ?",
    )
    .bind(gateway_id)
    .bind(id.to_string())
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

// ============================================================================
// Stage Operations
// ============================================================================

/// Columns an operator may change on an existing stage. For the optional
/// columns `None` leaves the stored value alone and `Some(None)` clears it.
/// `vars` is always written.
#[derive(Debug, Clone, Copy)]
pub struct StageChanges<'a> {
    pub description: Option<Option<&'a str>>,
    pub description_en: Option<Option<&'a str>>,
    pub vars: &'a BTreeMap<String, String>,
    pub micro_gateway_id: Option<Option<Uuid>>,
}

impl StageChanges<'_> {
    fn vars_json(&self) -> Result<String> {
        serde_json::to_string(self.vars)
            .map_err(|e| DatabaseError::InvalidData(format!("Failed to serialize stage vars: {}", e)))
    }
}

pub async fn insert_stage<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    name: &str,
    changes: &StageChanges<'_>,
    username: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO stages (gateway_id, name, description, description_en, vars, micro_gateway_id, created_by, updated_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(gateway_id)
    .bind(name)
    .bind(changes.description.flatten())
    .bind(changes.description_en.flatten())
    .bind(changes.vars_json()?)
    .bind(changes.micro_gateway_id.flatten().map(|id| id.to_string()))
    .bind(username)
    .bind(username)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Never touches `name`, `status` or `created_by`.
pub async fn update_stage<'e>(
    executor: impl SqliteExecutor<'e>,
    stage_id: i64,
    changes: &StageChanges<'_>,
    username: &str,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE stages SET vars = ");
    builder.push_bind(changes.vars_json()?);
    builder.push(", updated_by = ").push_bind(username);
    builder.push(", updated_at = ").push_bind(now);
    if let Some(description) = changes.description {
        builder.push(", description = ").push_bind(description);
    }
    if let Some(description_en) = changes.description_en {
        builder.push(", description_en = ").push_bind(description_en);
    }
    if let Some(micro_gateway_id) = changes.micro_gateway_id {
        builder
            .push(", micro_gateway_id = ")
            .push_bind(micro_gateway_id.map(|id| id.to_string()));
    }
    builder.push(" WHERE id = ").push_bind(stage_id);

    builder.build().execute(executor).await?;
    Ok(())
}

pub async fn get_stage<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    stage_id: i64,
) -> Result<Option<Stage>> {
    let row = sqlx::query_as::<_, StageRow>(
        r#"
        SELECT id, gateway_id, name, description, description_en, vars, status,
               micro_gateway_id, created_by, updated_by, created_at, updated_at
        FROM stages
        WHERE gateway_id = ? AND id = ?
        "#,
    )
    .bind(gateway_id)
    .bind(stage_id)
    .fetch_optional(executor)
    .await?;

    row.map(Stage::try_from).transpose()
}

pub async fn list_stages<'e>(executor: impl SqliteExecutor<'e>, gateway_id: i64) -> Result<Vec<Stage>> {
    let rows = sqlx::query_as::<_, StageRow>(
        r#"
        SELECT id, gateway_id, name, description, description_en, vars, status,
               micro_gateway_id, created_by, updated_by, created_at, updated_at
        FROM stages
        WHERE gateway_id = ?
        ORDER BY id
        "#,
    )
    .bind(gateway_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(Stage::try_from).collect()
}

pub async fn count_stages<'e>(executor: impl SqliteExecutor<'e>, gateway_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stages WHERE gateway_id = ?")
        .bind(gateway_id)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

pub async fn stage_name_exists<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    name: &str,
    exclude_stage_id: Option<i64>,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM stages WHERE gateway_id = ? AND name = ? AND (? IS NULL OR id != ?)",
    )
    .bind(gateway_id)
    .bind(name)
    .bind(exclude_stage_id)
    .bind(exclude_stage_id)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

/// Whether a stage other than `exclude_stage_id` already holds this micro gateway.
pub async fn micro_gateway_bound_elsewhere<'e>(
    executor: impl SqliteExecutor<'e>,
    micro_gateway_id: Uuid,
    exclude_stage_id: Option<i64>,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM stages WHERE micro_gateway_id = ? AND (? IS NULL OR id != ?)",
    )
    .bind(micro_gateway_id.to_string())
    .bind(exclude_stage_id)
    .bind(exclude_stage_id)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

pub async fn list_stages_with_release<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
) -> Result<Vec<StageReleaseRow>> {
    let rows = sqlx::query_as::<_, StageReleaseRow>(
        r#"
        SELECT s.id, s.name, r.resource_version
        FROM stages s
        LEFT JOIN releases r ON r.stage_id = s.id
        WHERE s.gateway_id = ?
        ORDER BY s.id
        "#,
    )
    .bind(gateway_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

// ============================================================================
// Backend Operations
// ============================================================================

pub async fn create_backend<'e>(executor: impl SqliteExecutor<'e>, gateway_id: i64, name: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO backends (gateway_id, name) VALUES (?, ?)")
        .bind(gateway_id)
        .bind(name)
        .execute(executor)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Insert-or-ignore then read back, so two concurrent callers end up with
/// the same row.
pub async fn get_or_create_backend(conn: &mut SqliteConnection, gateway_id: i64, name: &str) -> Result<Backend> {
    sqlx::query("INSERT OR IGNORE INTO backends (gateway_id, name) VALUES (?, ?)")
        .bind(gateway_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

    let row = sqlx::query_as::<_, BackendRow>(
        "SELECT id, gateway_id, name FROM backends WHERE gateway_id = ? AND name = ?",
    )
    .bind(gateway_id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Backend::from(row))
}

pub async fn get_backend_by_name<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    name: &str,
) -> Result<Option<Backend>> {
    let row = sqlx::query_as::<_, BackendRow>(
        "SELECT id, gateway_id, name FROM backends WHERE gateway_id = ? AND name = ?",
    )
    .bind(gateway_id)
    .bind(name)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Backend::from))
}

pub async fn list_backends_excluding<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    exclude_name: &str,
) -> Result<Vec<Backend>> {
    let rows = sqlx::query_as::<_, BackendRow>(
        "SELECT id, gateway_id, name FROM backends WHERE gateway_id = ? AND name != ? ORDER BY id",
    )
    .bind(gateway_id)
    .bind(exclude_name)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(Backend::from).collect())
}

// ============================================================================
// Backend Config Operations
// ============================================================================

pub async fn find_backend_config<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    backend_id: i64,
    stage_id: i64,
) -> Result<Option<BackendConfig>> {
    let row = sqlx::query_as::<_, BackendConfigRow>(
        r#"
        SELECT id, gateway_id, backend_id, stage_id, config
        FROM backend_configs
        WHERE gateway_id = ? AND backend_id = ? AND stage_id = ?
        "#,
    )
    .bind(gateway_id)
    .bind(backend_id)
    .bind(stage_id)
    .fetch_optional(executor)
    .await?;

    row.map(BackendConfig::try_from).transpose()
}

pub async fn list_backend_configs_for_stage<'e>(
    executor: impl SqliteExecutor<'e>,
    stage_id: i64,
) -> Result<Vec<BackendConfig>> {
    let rows = sqlx::query_as::<_, BackendConfigRow>(
        r#"
        SELECT id, gateway_id, backend_id, stage_id, config
        FROM backend_configs
        WHERE stage_id = ?
        ORDER BY backend_id
        "#,
    )
    .bind(stage_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(BackendConfig::try_from).collect()
}

pub async fn insert_backend_config<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    backend_id: i64,
    stage_id: i64,
    config: &BackendConfigValue,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO backend_configs (gateway_id, backend_id, stage_id, config) VALUES (?, ?, ?, ?)",
    )
    .bind(gateway_id)
    .bind(backend_id)
    .bind(stage_id)
    .bind(encode_config(config)?)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// One INSERT for all rows; a no-op for an empty list.
pub async fn bulk_insert_backend_configs<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    stage_id: i64,
    backend_ids: &[i64],
    config: &BackendConfigValue,
) -> Result<u64> {
    if backend_ids.is_empty() {
        return Ok(0);
    }

    let config_json = encode_config(config)?;
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO backend_configs (gateway_id, backend_id, stage_id, config) ");
    builder.push_values(backend_ids, |mut row, backend_id| {
        row.push_bind(gateway_id)
            .push_bind(*backend_id)
            .push_bind(stage_id)
            .push_bind(config_json.clone());
    });

    let result = builder.build().execute(executor).await?;
    Ok(result.rows_affected())
}

pub async fn update_backend_config<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
    config: &BackendConfigValue,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query("UPDATE backend_configs SET config = ?, updated_at = ? WHERE id = ?")
        .bind(encode_config(config)?)
        .bind(&now)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn test_get_or_create_backend_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = create_gateway(db.pool(), "demo").await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let first = get_or_create_backend(&mut conn, gateway_id, "default").await.unwrap();
        let second = get_or_create_backend(&mut conn, gateway_id, "default").await.unwrap();
        drop(conn);

        assert_eq!(first, second);
        let backends = list_backends_excluding(db.pool(), gateway_id, "other").await.unwrap();
        assert_eq!(backends.len(), 1);
    }

    #[tokio::test]
    async fn test_stage_name_exists_excludes_self() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = create_gateway(db.pool(), "demo").await.unwrap();
        let vars = BTreeMap::new();
        let changes = StageChanges {
            description: None,
            description_en: None,
            vars: &vars,
            micro_gateway_id: None,
        };
        let stage_id = insert_stage(db.pool(), gateway_id, "prod", &changes, "admin").await.unwrap();

        assert!(stage_name_exists(db.pool(), gateway_id, "prod", None).await.unwrap());
        assert!(!stage_name_exists(db.pool(), gateway_id, "prod", Some(stage_id)).await.unwrap());
        assert!(!stage_name_exists(db.pool(), gateway_id, "test", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_stage_writes_only_present_columns() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = create_gateway(db.pool(), "demo").await.unwrap();
        let micro_gateway = Uuid::now_v7();
        create_micro_gateway(db.pool(), gateway_id, micro_gateway, "edge").await.unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("domain".to_string(), "example.com".to_string());
        let created = StageChanges {
            description: Some(Some("生产环境")),
            description_en: Some(Some("Production")),
            vars: &vars,
            micro_gateway_id: Some(Some(micro_gateway)),
        };
        let stage_id = insert_stage(db.pool(), gateway_id, "prod", &created, "admin").await.unwrap();

        let empty = BTreeMap::new();
        let keep = StageChanges {
            description: None,
            description_en: None,
            vars: &empty,
            micro_gateway_id: None,
        };
        update_stage(db.pool(), stage_id, &keep, "bob").await.unwrap();
        let stage = get_stage(db.pool(), gateway_id, stage_id).await.unwrap().unwrap();
        assert_eq!(stage.description.as_deref(), Some("生产环境"));
        assert_eq!(stage.description_en.as_deref(), Some("Production"));
        assert_eq!(stage.micro_gateway_id, Some(micro_gateway));
        assert!(stage.vars.is_empty());
        assert_eq!(stage.updated_by, "bob");

        let clear = StageChanges {
            description: Some(None),
            micro_gateway_id: Some(None),
            ..keep
        };
        update_stage(db.pool(), stage_id, &clear, "bob").await.unwrap();
        let stage = get_stage(db.pool(), gateway_id, stage_id).await.unwrap().unwrap();
        assert_eq!(stage.description, None);
        assert_eq!(stage.description_en.as_deref(), Some("Production"));
        assert_eq!(stage.micro_gateway_id, None);
    }

    #[tokio::test]
    async fn test_bulk_insert_backend_configs() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = create_gateway(db.pool(), "demo").await.unwrap();
        let vars = BTreeMap::new();
        let changes = StageChanges {
            description: None,
            description_en: None,
            vars: &vars,
            micro_gateway_id: None,
        };
        let stage_id = insert_stage(db.pool(), gateway_id, "prod", &changes, "admin").await.unwrap();
        let a = create_backend(db.pool(), gateway_id, "a").await.unwrap();
        let b = create_backend(db.pool(), gateway_id, "b").await.unwrap();

        let placeholder = BackendConfigValue::placeholder();
        let inserted = bulk_insert_backend_configs(db.pool(), gateway_id, stage_id, &[a, b], &placeholder)
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let none = bulk_insert_backend_configs(db.pool(), gateway_id, stage_id, &[], &placeholder)
            .await
            .unwrap();
        assert_eq!(none, 0);

        let configs = list_backend_configs_for_stage(db.pool(), stage_id).await.unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs.iter().all(|c| c.config == placeholder));
    }
}
