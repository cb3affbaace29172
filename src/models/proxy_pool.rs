use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 代理池引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PoolRef {
    /// 代理池ID
    pub id: i64,
    /// 代理池名称
    pub name: String,
}
