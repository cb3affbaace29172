use chrono::{DateTime, Utc};

/// 时间来源
///
/// 覆盖是否生效完全由注入的“当前时间”决定，测试时替换为固定时间。
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
