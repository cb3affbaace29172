use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 凭据在代理池中的绑定记录
///
/// `primary_endpoint_id` 只由重算写入；两个覆盖字段只由覆盖的设置/清除写入，
/// 并且二者要么同时为空，要么同时有值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Binding {
    /// 绑定ID
    pub id: i64,
    /// 凭据ID
    pub credential_id: i64,
    /// 代理池ID
    pub pool_id: i64,
    /// 最近一次成功重算分配的主代理
    pub primary_endpoint_id: Option<i64>,
    /// 人工覆盖的代理
    pub override_endpoint_id: Option<i64>,
    /// 覆盖到期时间
    pub override_expires_at: Option<DateTime<Utc>>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

/// 绑定当前生效的模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveMode {
    /// 使用主代理
    Primary,
    /// 使用未过期的人工覆盖
    Override,
}

/// 某一时刻绑定的生效结果，只在读取时计算，不落库
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveAssignment {
    pub endpoint_id: Option<i64>,
    pub mode: EffectiveMode,
}
