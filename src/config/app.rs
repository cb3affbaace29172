use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 单代理绑定数上限的硬性边界
pub const MAX_SLOTS_PER_ENDPOINT_LIMIT: u32 = 1000;

/// 覆盖有效期默认上限：30天
const DEFAULT_OVERRIDE_MAX_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 环境模式
    pub environment: Environment,
    /// 服务器地址和端口
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 绑定分配配置
    pub allocation: AllocationConfig,
}

/// 环境模式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "testing" => Ok(Environment::Testing),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器主机地址
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 日志级别
    pub log_level: String,
}

/// 数据库配置 - SQLite版本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库URL (sqlite://path/to/db.sqlite3)
    pub url: String,
    /// 数据库文件路径
    pub path: PathBuf,
    /// 是否启用WAL模式
    pub enable_wal: bool,
    /// 是否启用外键约束
    pub enable_foreign_keys: bool,
    /// 最大连接数
    pub max_connections: u32,
    /// 数据库忙时的重试策略
    pub busy_retry: BusyRetryConfig,
}

/// SQLite 忙重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyRetryConfig {
    /// 最大重试次数
    pub retries: u32,
    /// 首次退避(毫秒)
    pub base_delay_ms: u64,
    /// 退避上限(毫秒)
    pub max_delay_ms: u64,
}

impl Default for BusyRetryConfig {
    fn default() -> Self {
        Self {
            retries: 8,
            base_delay_ms: 50,
            max_delay_ms: 2000,
        }
    }
}

/// 绑定分配配置
///
/// 显式传入重算协调器与覆盖存储，分配算法内部不读取任何进程级状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// 请求未指定时的单代理最多绑定令牌数
    pub default_max_slots_per_endpoint: u32,
    /// 请求未指定时是否严格准入
    pub default_strict: bool,
    /// 人工覆盖的最长有效期
    pub override_max_ttl: Duration,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_max_slots_per_endpoint: 2,
            default_strict: true,
            override_max_ttl: Duration::from_millis(DEFAULT_OVERRIDE_MAX_TTL_MS),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // 加载.env文件
        dotenv::dotenv().ok();

        // 解析环境
        let environment = env::var("APP_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .parse::<Environment>()
            .unwrap_or(Environment::Development);

        // 服务器配置
        let host = env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("APP_PORT", 3000u16);
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        // SQLite数据库配置
        let db_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "database.sqlite3".to_string());
        let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}?mode=rwc", db_path)
        });
        let enable_wal = env_or("SQLITE_ENABLE_WAL", true);
        let enable_foreign_keys = env_or("SQLITE_ENABLE_FOREIGN_KEYS", true);
        let max_connections = env_or("SQLITE_MAX_CONNECTIONS", 5u32);

        let busy_retry = BusyRetryConfig {
            retries: env_or("SQLITE_BUSY_RETRIES", 8u32).min(50),
            base_delay_ms: env_or("SQLITE_BUSY_BASE_DELAY_MS", 50u64).min(5_000),
            max_delay_ms: env_or("SQLITE_BUSY_MAX_DELAY_MS", 2_000u64).min(30_000),
        };

        // 绑定分配配置
        let default_max_slots_per_endpoint = env_or("BINDING_DEFAULT_MAX_SLOTS", 2u32);
        if default_max_slots_per_endpoint == 0
            || default_max_slots_per_endpoint > MAX_SLOTS_PER_ENDPOINT_LIMIT
        {
            return Err(config::ConfigError::Message(format!(
                "BINDING_DEFAULT_MAX_SLOTS 必须在 1..={} 之间",
                MAX_SLOTS_PER_ENDPOINT_LIMIT
            )));
        }
        let default_strict = env_or("BINDING_DEFAULT_STRICT", true);
        let override_max_ttl_ms = env_or("OVERRIDE_MAX_TTL_MS", DEFAULT_OVERRIDE_MAX_TTL_MS);
        if override_max_ttl_ms == 0 {
            return Err(config::ConfigError::Message(
                "OVERRIDE_MAX_TTL_MS 必须大于0".to_string(),
            ));
        }

        Ok(Self {
            environment,
            server: ServerConfig {
                host,
                port,
                log_level,
            },
            database: DatabaseConfig {
                url: db_url,
                path: PathBuf::from(db_path),
                enable_wal,
                enable_foreign_keys,
                max_connections,
                busy_retry,
            },
            allocation: AllocationConfig {
                default_max_slots_per_endpoint,
                default_strict,
                override_max_ttl: Duration::from_millis(override_max_ttl_ms),
            },
        })
    }

    /// 获取Socket地址
    pub fn socket_addr(&self) -> Result<SocketAddr, config::ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| config::ConfigError::Message(format!("无效的监听地址: {}", e)))
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
