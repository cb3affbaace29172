use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::BusyRetryConfig;
use crate::error::{AppError, AppResult};

/// SQLite 的 BUSY/LOCKED 主错误码及常见扩展码
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// 判断是否为 SQLite 忙/锁冲突
pub fn is_busy_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            if let Some(code) = db.code() {
                if BUSY_CODES.contains(&code.as_ref()) {
                    return true;
                }
            }
            let msg = db.message().to_lowercase();
            msg.contains("database is locked")
                || msg.contains("database table is locked")
                || msg.contains("database schema is locked")
                || msg.contains("database is busy")
        }
        _ => false,
    }
}

fn backoff_delay(config: &BusyRetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(20));
    let capped = if config.max_delay_ms > 0 {
        exp.min(config.max_delay_ms)
    } else {
        exp
    };
    if capped == 0 {
        return Duration::ZERO;
    }
    // ±10% 抖动，避免并发请求同步重试
    let jitter = rand::thread_rng().gen_range(0.9..1.1);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// 执行一个数据库工作单元，遇到 SQLite 忙错误时指数退避重试
///
/// 只有数据库忙会被重试；容量不足、校验失败、不存在、冲突等业务错误原样返回。
pub async fn with_busy_retry<T, F, Fut>(config: &BusyRetryConfig, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(AppError::Database(err)) if is_busy_error(&err) && attempt < config.retries => {
                let delay = backoff_delay(config, attempt);
                warn!("数据库忙，第{}次重试，等待{:?}: {}", attempt + 1, delay, err);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            other => return other,
        }
    }
}
