use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 凭据引用，只有启用的凭据参与分配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct CredentialRef {
    /// 凭据ID
    pub id: i64,
    /// 备注名
    pub label: Option<String>,
}
