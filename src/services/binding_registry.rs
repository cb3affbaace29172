//! 绑定注册表：绑定及其相关表的持久化访问
//!
//! 以 `&mut SqliteConnection` 为参数的函数既可以在事务内调用，也可以在普通连接上调用，
//! 由上层决定事务边界。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::models::{
    ActiveMembership, AuditEntry, Binding, CredentialRef, EffectiveMode, EndpointSummary,
    MembershipInput, PoolRef, ProxyEndpoint,
};
use crate::services::override_store::effective;

const BINDING_COLUMNS: &str = "id, credential_id, pool_id, primary_endpoint_id, \
    override_endpoint_id, override_expires_at, created_at, updated_at";

/// 列表中的单条绑定，生效结果在构建响应时计算
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BindingView {
    pub binding_id: i64,
    pub credential: CredentialRef,
    pub pool: PoolRef,
    pub primary_endpoint: Option<EndpointSummary>,
    pub override_endpoint: Option<EndpointSummary>,
    pub override_expires_at: Option<DateTime<Utc>>,
    pub effective_endpoint_id: Option<i64>,
    pub effective_mode: EffectiveMode,
    pub updated_at: DateTime<Utc>,
}

/// 代理池成员统计
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PoolSummary {
    pub pool_id: i64,
    pub pool_endpoints_total: i64,
    pub pool_endpoints_enabled: i64,
}

/// 成员替换的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct MembershipChange {
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

#[derive(Debug, Clone)]
pub struct BindingRegistry {
    db: SqlitePool,
}

fn endpoint_from_prefixed(row: &sqlx::sqlite::SqliteRow, prefix: &str) -> Option<EndpointSummary> {
    let id: Option<i64> = row.get(format!("{prefix}_id").as_str());
    id.map(|id| EndpointSummary {
        id,
        scheme: row.get(format!("{prefix}_scheme").as_str()),
        host: row.get(format!("{prefix}_host").as_str()),
        port: row.get(format!("{prefix}_port").as_str()),
        username: row.get(format!("{prefix}_username").as_str()),
    })
}

impl BindingRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn begin(&self) -> AppResult<Transaction<'static, Sqlite>> {
        Ok(self.db.begin().await?)
    }

    pub async fn pool_exists(&self, pool_id: i64) -> AppResult<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxy_pools WHERE id = ?")
            .bind(pool_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn find_pool(conn: &mut SqliteConnection, pool_id: i64) -> AppResult<Option<PoolRef>> {
        let pool = sqlx::query_as::<_, PoolRef>("SELECT id, name FROM proxy_pools WHERE id = ?")
            .bind(pool_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(pool)
    }

    pub async fn find_credential(
        conn: &mut SqliteConnection,
        credential_id: i64,
    ) -> AppResult<Option<CredentialRef>> {
        let credential =
            sqlx::query_as::<_, CredentialRef>("SELECT id, label FROM credentials WHERE id = ?")
                .bind(credential_id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(credential)
    }

    pub async fn find_endpoint(
        conn: &mut SqliteConnection,
        endpoint_id: i64,
    ) -> AppResult<Option<ProxyEndpoint>> {
        let endpoint = sqlx::query_as::<_, ProxyEndpoint>(
            "SELECT id, scheme, host, port, username, enabled, reachable FROM proxy_endpoints WHERE id = ?",
        )
        .bind(endpoint_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(endpoint)
    }

    /// 参与分配的成员，按节点ID升序
    pub async fn load_active_memberships(
        conn: &mut SqliteConnection,
        pool_id: i64,
    ) -> AppResult<Vec<ActiveMembership>> {
        let rows = sqlx::query_as::<_, ActiveMembership>(
            r#"
            SELECT ppe.endpoint_id AS endpoint_id, ppe.weight AS weight
            FROM proxy_pool_endpoints ppe
            JOIN proxy_endpoints pe ON pe.id = ppe.endpoint_id
            WHERE ppe.pool_id = ?
              AND ppe.enabled = 1
              AND pe.enabled = 1
              AND pe.reachable = 1
            ORDER BY ppe.endpoint_id ASC
            "#,
        )
        .bind(pool_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// 启用的凭据ID，升序
    pub async fn load_enabled_credential_ids(conn: &mut SqliteConnection) -> AppResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM credentials WHERE enabled = 1 ORDER BY id ASC",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(ids)
    }

    /// 成员启用且节点启用即为活跃成员，可达性只影响重算时的槽位
    pub async fn is_active_member(
        conn: &mut SqliteConnection,
        pool_id: i64,
        endpoint_id: i64,
    ) -> AppResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM proxy_pool_endpoints ppe
            JOIN proxy_endpoints pe ON pe.id = ppe.endpoint_id
            WHERE ppe.pool_id = ?
              AND ppe.endpoint_id = ?
              AND ppe.enabled = 1
              AND pe.enabled = 1
            "#,
        )
        .bind(pool_id)
        .bind(endpoint_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    /// 覆盖写入主代理：只更新 `primary_endpoint_id` 与 `updated_at`，不存在的绑定会被创建
    pub async fn upsert_primary_assignments(
        conn: &mut SqliteConnection,
        pool_id: i64,
        assignments: &BTreeMap<i64, i64>,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut written = 0u64;
        for (credential_id, endpoint_id) in assignments {
            let result = sqlx::query(
                r#"
                INSERT INTO bindings (credential_id, pool_id, primary_endpoint_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (credential_id, pool_id) DO UPDATE SET
                    primary_endpoint_id = excluded.primary_endpoint_id,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(credential_id)
            .bind(pool_id)
            .bind(endpoint_id)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    pub async fn find_binding(
        conn: &mut SqliteConnection,
        binding_id: i64,
    ) -> AppResult<Option<Binding>> {
        let sql = format!("SELECT {BINDING_COLUMNS} FROM bindings WHERE id = ?");
        let binding = sqlx::query_as::<_, Binding>(&sql)
            .bind(binding_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(binding)
    }

    /// 获取绑定，不存在时以空主代理创建
    pub async fn ensure_binding(
        conn: &mut SqliteConnection,
        credential_id: i64,
        pool_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Binding> {
        sqlx::query(
            r#"
            INSERT INTO bindings (credential_id, pool_id, primary_endpoint_id, created_at, updated_at)
            VALUES (?, ?, NULL, ?, ?)
            ON CONFLICT (credential_id, pool_id) DO NOTHING
            "#,
        )
        .bind(credential_id)
        .bind(pool_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let sql = format!("SELECT {BINDING_COLUMNS} FROM bindings WHERE credential_id = ? AND pool_id = ?");
        let binding = sqlx::query_as::<_, Binding>(&sql)
            .bind(credential_id)
            .bind(pool_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(binding)
    }

    /// 写入或清除覆盖字段，两个字段总是一起变化
    pub async fn write_override(
        conn: &mut SqliteConnection,
        binding_id: i64,
        target: Option<(i64, DateTime<Utc>)>,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let (endpoint_id, expires_at) = match target {
            Some((endpoint_id, expires_at)) => (Some(endpoint_id), Some(expires_at)),
            None => (None, None),
        };
        let result = sqlx::query(
            r#"
            UPDATE bindings
            SET override_endpoint_id = ?, override_expires_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(endpoint_id)
        .bind(expires_at)
        .bind(now)
        .bind(binding_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// 清除所有指向该节点的覆盖
    pub async fn clear_overrides_for_endpoint(
        conn: &mut SqliteConnection,
        endpoint_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bindings
            SET override_endpoint_id = NULL, override_expires_at = NULL, updated_at = ?
            WHERE override_endpoint_id = ?
            "#,
        )
        .bind(now)
        .bind(endpoint_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// 删除节点的全部成员关系，返回受影响的代理池
    pub async fn remove_memberships_for_endpoint(
        conn: &mut SqliteConnection,
        endpoint_id: i64,
    ) -> AppResult<Vec<i64>> {
        let pool_ids = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT pool_id FROM proxy_pool_endpoints WHERE endpoint_id = ? ORDER BY pool_id ASC",
        )
        .bind(endpoint_id)
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM proxy_pool_endpoints WHERE endpoint_id = ?")
            .bind(endpoint_id)
            .execute(&mut *conn)
            .await?;

        Ok(pool_ids)
    }

    pub async fn disable_endpoint(
        conn: &mut SqliteConnection,
        endpoint_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE proxy_endpoints SET enabled = 0, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(endpoint_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// 用给定列表替换代理池的成员集合
    pub async fn replace_memberships(
        conn: &mut SqliteConnection,
        pool_id: i64,
        items: &[MembershipInput],
        now: DateTime<Utc>,
    ) -> AppResult<MembershipChange> {
        let current: Vec<i64> = sqlx::query_scalar::<_, i64>(
            "SELECT endpoint_id FROM proxy_pool_endpoints WHERE pool_id = ?",
        )
        .bind(pool_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut change = MembershipChange::default();

        for item in items {
            if current.contains(&item.endpoint_id) {
                sqlx::query(
                    r#"
                    UPDATE proxy_pool_endpoints
                    SET weight = ?, enabled = ?, updated_at = ?
                    WHERE pool_id = ? AND endpoint_id = ?
                    "#,
                )
                .bind(item.weight)
                .bind(item.enabled)
                .bind(now)
                .bind(pool_id)
                .bind(item.endpoint_id)
                .execute(&mut *conn)
                .await?;
                change.updated += 1;
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO proxy_pool_endpoints (pool_id, endpoint_id, weight, enabled, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(pool_id)
                .bind(item.endpoint_id)
                .bind(item.weight)
                .bind(item.enabled)
                .bind(now)
                .bind(now)
                .execute(&mut *conn)
                .await?;
                change.created += 1;
            }
        }

        for endpoint_id in current {
            if items.iter().any(|i| i.endpoint_id == endpoint_id) {
                continue;
            }
            sqlx::query("DELETE FROM proxy_pool_endpoints WHERE pool_id = ? AND endpoint_id = ?")
                .bind(pool_id)
                .bind(endpoint_id)
                .execute(&mut *conn)
                .await?;
            change.removed += 1;
        }

        Ok(change)
    }

    pub async fn record_audit(conn: &mut SqliteConnection, entry: &AuditEntry) -> AppResult<()> {
        let detail = if entry.detail.is_null() {
            None
        } else {
            Some(entry.detail.to_string())
        };
        sqlx::query(
            r#"
            INSERT INTO admin_audit (action, resource, record_id, request_id, detail_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.action)
        .bind(entry.resource)
        .bind(&entry.record_id)
        .bind(&entry.request_id)
        .bind(detail)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// 列出代理池的全部绑定，每条的生效结果按 `now` 计算
    pub async fn list_pool_bindings(
        &self,
        pool_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<BindingView>> {
        let rows = sqlx::query(
            r#"
            SELECT
                b.id, b.credential_id, b.pool_id, b.primary_endpoint_id, b.override_endpoint_id,
                b.override_expires_at, b.created_at, b.updated_at,
                c.label AS credential_label,
                p.name AS pool_name,
                pe.id AS primary_id, pe.scheme AS primary_scheme, pe.host AS primary_host,
                pe.port AS primary_port, pe.username AS primary_username,
                oe.id AS override_id, oe.scheme AS override_scheme, oe.host AS override_host,
                oe.port AS override_port, oe.username AS override_username
            FROM bindings b
            JOIN credentials c ON c.id = b.credential_id
            JOIN proxy_pools p ON p.id = b.pool_id
            LEFT JOIN proxy_endpoints pe ON pe.id = b.primary_endpoint_id
            LEFT JOIN proxy_endpoints oe ON oe.id = b.override_endpoint_id
            WHERE b.pool_id = ?
            ORDER BY b.id ASC
            "#,
        )
        .bind(pool_id)
        .fetch_all(&self.db)
        .await?;

        let views = rows
            .iter()
            .map(|row| {
                let binding = Binding {
                    id: row.get("id"),
                    credential_id: row.get("credential_id"),
                    pool_id: row.get("pool_id"),
                    primary_endpoint_id: row.get("primary_endpoint_id"),
                    override_endpoint_id: row.get("override_endpoint_id"),
                    override_expires_at: row.get("override_expires_at"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                };
                let eff = effective(&binding, now);
                BindingView {
                    binding_id: binding.id,
                    credential: CredentialRef {
                        id: binding.credential_id,
                        label: row.get("credential_label"),
                    },
                    pool: PoolRef {
                        id: binding.pool_id,
                        name: row.get("pool_name"),
                    },
                    primary_endpoint: endpoint_from_prefixed(row, "primary"),
                    override_endpoint: endpoint_from_prefixed(row, "override"),
                    override_expires_at: binding.override_expires_at,
                    effective_endpoint_id: eff.endpoint_id,
                    effective_mode: eff.mode,
                    updated_at: binding.updated_at,
                }
            })
            .collect();

        Ok(views)
    }

    pub async fn pool_summary(&self, pool_id: i64) -> AppResult<PoolSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(ppe.endpoint_id) AS total,
                COALESCE(SUM(CASE WHEN ppe.enabled = 1 AND pe.enabled = 1 AND pe.reachable = 1 THEN 1 ELSE 0 END), 0) AS enabled
            FROM proxy_pool_endpoints ppe
            JOIN proxy_endpoints pe ON pe.id = ppe.endpoint_id
            WHERE ppe.pool_id = ?
            "#,
        )
        .bind(pool_id)
        .fetch_one(&self.db)
        .await?;

        Ok(PoolSummary {
            pool_id,
            pool_endpoints_total: row.get("total"),
            pool_endpoints_enabled: row.get("enabled"),
        })
    }
}
