#![allow(dead_code)]

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use token_proxy_binder::config::{AllocationConfig, BusyRetryConfig};
use token_proxy_binder::database::run_migrations;
use token_proxy_binder::routes::api::AppState;
use token_proxy_binder::services::Clock;

/// 可手动推进的时钟
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// 单连接的内存数据库，连接不回收，保证整个测试内数据可见
pub async fn test_db() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub fn no_retry() -> BusyRetryConfig {
    BusyRetryConfig {
        retries: 0,
        base_delay_ms: 0,
        max_delay_ms: 0,
    }
}

pub struct Harness {
    pub db: SqlitePool,
    pub clock: Arc<FixedClock>,
    pub state: AppState,
}

pub async fn harness() -> Harness {
    let db = test_db().await;
    let clock = FixedClock::new(start_time());
    let state = AppState::new(
        db.clone(),
        AllocationConfig::default(),
        no_retry(),
        clock.clone(),
    );
    Harness { db, clock, state }
}

pub async fn insert_credential(db: &SqlitePool, label: &str, enabled: bool) -> i64 {
    sqlx::query("INSERT INTO credentials (label, enabled) VALUES (?, ?)")
        .bind(label)
        .bind(enabled)
        .execute(db)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn insert_credentials(db: &SqlitePool, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(insert_credential(db, &format!("token-{i}"), true).await);
    }
    ids
}

pub async fn insert_endpoint(db: &SqlitePool, host: &str, enabled: bool, reachable: bool) -> i64 {
    sqlx::query(
        "INSERT INTO proxy_endpoints (scheme, host, port, username, enabled, reachable) VALUES ('http', ?, 8080, 'user', ?, ?)",
    )
    .bind(host)
    .bind(enabled)
    .bind(reachable)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn insert_pool(db: &SqlitePool, name: &str) -> i64 {
    sqlx::query("INSERT INTO proxy_pools (name) VALUES (?)")
        .bind(name)
        .execute(db)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_member(db: &SqlitePool, pool_id: i64, endpoint_id: i64, weight: f64) {
    sqlx::query("INSERT INTO proxy_pool_endpoints (pool_id, endpoint_id, weight, enabled) VALUES (?, ?, ?, 1)")
        .bind(pool_id)
        .bind(endpoint_id)
        .bind(weight)
        .execute(db)
        .await
        .unwrap();
}

pub async fn binding_id(db: &SqlitePool, credential_id: i64, pool_id: i64) -> i64 {
    sqlx::query_scalar("SELECT id FROM bindings WHERE credential_id = ? AND pool_id = ?")
        .bind(credential_id)
        .bind(pool_id)
        .fetch_one(db)
        .await
        .unwrap()
}

/// 凭据ID → 主代理
pub async fn primaries(db: &SqlitePool, pool_id: i64) -> BTreeMap<i64, Option<i64>> {
    let rows: Vec<(i64, Option<i64>)> = sqlx::query_as(
        "SELECT credential_id, primary_endpoint_id FROM bindings WHERE pool_id = ? ORDER BY credential_id",
    )
    .bind(pool_id)
    .fetch_all(db)
    .await
    .unwrap();
    rows.into_iter().collect()
}

pub async fn audit_count(db: &SqlitePool, action: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM admin_audit WHERE action = ?")
        .bind(action)
        .fetch_one(db)
        .await
        .unwrap()
}

impl Harness {
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
