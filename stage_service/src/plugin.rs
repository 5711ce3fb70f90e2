//! Header Rewrite Plugin
//!
//! Converts a stage's `transform_headers` block into a `bk-header-rewrite`
//! plugin config and keeps the scope-bound plugin rows in sync with it.
//! Configs are stored as YAML, the format the data plane consumes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqliteExecutor};
use tracing::debug;

use crate::constants::{HEADER_REWRITE_PLUGIN_CODE, PluginBindingScope};
use crate::database::PluginBindingRow;
use crate::error::Result;
use crate::validation::TransformHeaders;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderKey {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRewriteConfig {
    #[serde(default)]
    pub set: Vec<HeaderEntry>,
    #[serde(default)]
    pub remove: Vec<HeaderKey>,
}

pub struct HeaderRewriteConvertor;

impl HeaderRewriteConvertor {
    /// `None` when there is nothing to set or remove; syncing `None` removes
    /// any existing binding.
    pub fn transform_headers_to_plugin_config(headers: &TransformHeaders) -> Option<HeaderRewriteConfig> {
        if headers.is_empty() {
            return None;
        }

        Some(HeaderRewriteConfig {
            set: headers
                .set
                .iter()
                .map(|(key, value)| HeaderEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            remove: headers
                .delete
                .iter()
                .map(|key| HeaderKey { key: key.clone() })
                .collect(),
        })
    }

    pub fn plugin_config_to_transform_headers(config: &HeaderRewriteConfig) -> TransformHeaders {
        TransformHeaders {
            set: config
                .set
                .iter()
                .map(|entry| (entry.key.clone(), entry.value.clone()))
                .collect(),
            delete: config.remove.iter().map(|k| k.key.clone()).collect(),
        }
    }

    /// Make the bindings of `scope` match `scope_configs` exactly: update,
    /// create or delete per scope id. Attributed to `username`.
    pub async fn sync_plugins(
        conn: &mut SqliteConnection,
        gateway_id: i64,
        scope: PluginBindingScope,
        scope_configs: &BTreeMap<i64, Option<HeaderRewriteConfig>>,
        username: &str,
    ) -> Result<()> {
        for (&scope_id, config) in scope_configs {
            let existing = find_binding(&mut *conn, gateway_id, scope, scope_id).await?;

            match (existing, config) {
                (Some(binding), Some(config)) => {
                    let yaml = serde_yaml::to_string(config)?;
                    let now = chrono::Utc::now().to_rfc3339();
                    sqlx::query("UPDATE plugin_configs SET yaml = ?, updated_by = ?, updated_at = ? WHERE id = ?")
                        .bind(&yaml)
                        .bind(username)
                        .bind(&now)
                        .bind(binding.config_id)
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("UPDATE plugin_bindings SET updated_by = ?, updated_at = ? WHERE id = ?")
                        .bind(username)
                        .bind(&now)
                        .bind(binding.id)
                        .execute(&mut *conn)
                        .await?;
                    debug!(gateway_id, scope_id, scope = scope.as_str(), "Updated header rewrite plugin");
                }
                (Some(binding), None) => {
                    sqlx::query("DELETE FROM plugin_bindings WHERE id = ?")
                        .bind(binding.id)
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("DELETE FROM plugin_configs WHERE id = ?")
                        .bind(binding.config_id)
                        .execute(&mut *conn)
                        .await?;
                    debug!(gateway_id, scope_id, scope = scope.as_str(), "Removed header rewrite plugin");
                }
                (None, Some(config)) => {
                    let yaml = serde_yaml::to_string(config)?;
                    let name = format!("{}-{}-header-rewrite", scope.as_str(), scope_id);
                    let config_id = sqlx::query(
                        r#"
                        INSERT INTO plugin_configs (gateway_id, name, type_code, yaml, created_by, updated_by)
                        VALUES (?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(gateway_id)
                    .bind(&name)
                    .bind(HEADER_REWRITE_PLUGIN_CODE)
                    .bind(&yaml)
                    .bind(username)
                    .bind(username)
                    .execute(&mut *conn)
                    .await?
                    .last_insert_rowid();

                    sqlx::query(
                        r#"
                        INSERT INTO plugin_bindings (gateway_id, scope_type, scope_id, type_code, config_id, created_by, updated_by)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(gateway_id)
                    .bind(scope.as_str())
                    .bind(scope_id)
                    .bind(HEADER_REWRITE_PLUGIN_CODE)
                    .bind(config_id)
                    .bind(username)
                    .bind(username)
                    .execute(&mut *conn)
                    .await?;
                    debug!(gateway_id, scope_id, scope = scope.as_str(), "Created header rewrite plugin");
                }
                (None, None) => {}
            }
        }

        Ok(())
    }

    pub async fn get_scope_config<'e>(
        executor: impl SqliteExecutor<'e>,
        gateway_id: i64,
        scope: PluginBindingScope,
        scope_id: i64,
    ) -> Result<Option<HeaderRewriteConfig>> {
        match find_binding(executor, gateway_id, scope, scope_id).await? {
            Some(binding) => Ok(Some(serde_yaml::from_str(&binding.yaml)?)),
            None => Ok(None),
        }
    }
}

async fn find_binding<'e>(
    executor: impl SqliteExecutor<'e>,
    gateway_id: i64,
    scope: PluginBindingScope,
    scope_id: i64,
) -> Result<Option<PluginBindingRow>> {
    let row = sqlx::query_as::<_, PluginBindingRow>(
        r#"
        SELECT b.id, b.scope_id, b.config_id, c.yaml, c.created_by, c.updated_by
        FROM plugin_bindings b
        JOIN plugin_configs c ON c.id = b.config_id
        WHERE b.gateway_id = ? AND b.scope_type = ? AND b.scope_id = ? AND b.type_code = ?
        "#,
    )
    .bind(gateway_id)
    .bind(scope.as_str())
    .bind(scope_id)
    .bind(HEADER_REWRITE_PLUGIN_CODE)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::stores;

    fn headers(set: &[(&str, &str)], delete: &[&str]) -> TransformHeaders {
        TransformHeaders {
            set: set.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            delete: delete.iter().map(|k| k.to_string()).collect(),
        }
    }

    async fn plugin_row_counts(db: &Database) -> (i64, i64) {
        let configs = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM plugin_configs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let bindings = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM plugin_bindings")
            .fetch_one(db.pool())
            .await
            .unwrap();
        (configs, bindings)
    }

    #[test]
    fn test_transform_headers_to_plugin_config() {
        let config = HeaderRewriteConvertor::transform_headers_to_plugin_config(&headers(
            &[("X-Env", "prod")],
            &["X-Debug"],
        ))
        .unwrap();

        assert_eq!(
            config,
            HeaderRewriteConfig {
                set: vec![HeaderEntry {
                    key: "X-Env".to_string(),
                    value: "prod".to_string()
                }],
                remove: vec![HeaderKey {
                    key: "X-Debug".to_string()
                }],
            }
        );

        let back = HeaderRewriteConvertor::plugin_config_to_transform_headers(&config);
        assert_eq!(back, headers(&[("X-Env", "prod")], &["X-Debug"]));
    }

    #[test]
    fn test_empty_headers_have_no_plugin_config() {
        assert_eq!(
            HeaderRewriteConvertor::transform_headers_to_plugin_config(&TransformHeaders::default()),
            None
        );
    }

    #[tokio::test]
    async fn test_sync_create_update_delete() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = stores::create_gateway(db.pool(), "demo").await.unwrap();
        let scope = PluginBindingScope::Stage;

        let first = HeaderRewriteConvertor::transform_headers_to_plugin_config(&headers(&[("X-Env", "test")], &[]));
        let mut conn = db.acquire().await.unwrap();
        HeaderRewriteConvertor::sync_plugins(&mut conn, gateway_id, scope, &BTreeMap::from([(7, first.clone())]), "alice")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(plugin_row_counts(&db).await, (1, 1));
        let stored = HeaderRewriteConvertor::get_scope_config(db.pool(), gateway_id, scope, 7).await.unwrap();
        assert_eq!(stored, first);

        // Update in place keeps a single binding
        let second = HeaderRewriteConvertor::transform_headers_to_plugin_config(&headers(&[], &["X-Debug"]));
        let mut conn = db.acquire().await.unwrap();
        HeaderRewriteConvertor::sync_plugins(&mut conn, gateway_id, scope, &BTreeMap::from([(7, second.clone())]), "bob")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(plugin_row_counts(&db).await, (1, 1));
        let stored = HeaderRewriteConvertor::get_scope_config(db.pool(), gateway_id, scope, 7).await.unwrap();
        assert_eq!(stored, second);
        let updated_by = sqlx::query_scalar::<_, String>("SELECT updated_by FROM plugin_configs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(updated_by, "bob");

        // Empty headers remove the binding and its config
        let mut conn = db.acquire().await.unwrap();
        HeaderRewriteConvertor::sync_plugins(&mut conn, gateway_id, scope, &BTreeMap::from([(7, None)]), "bob")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(plugin_row_counts(&db).await, (0, 0));
        assert_eq!(
            HeaderRewriteConvertor::get_scope_config(db.pool(), gateway_id, scope, 7).await.unwrap(),
            None
        );
    }
}
