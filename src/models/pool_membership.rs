use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// 单个成员权重上限
pub const MAX_MEMBERSHIP_WEIGHT: f64 = 1000.0;

/// 参与分配的成员：成员启用且节点启用、可达
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct ActiveMembership {
    pub endpoint_id: i64,
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn validate_weight(weight: f64) -> Result<(), ValidationError> {
    if weight.is_finite() && (0.0..=MAX_MEMBERSHIP_WEIGHT).contains(&weight) {
        Ok(())
    } else {
        Err(ValidationError::new("weight_out_of_range"))
    }
}

/// 成员写入请求项，在写入边界完成校验，分配器内部不再校验
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct MembershipInput {
    /// 代理节点ID
    #[validate(range(min = 1))]
    pub endpoint_id: i64,
    /// 权重，默认1
    #[serde(default = "default_weight")]
    #[validate(custom = "validate_weight")]
    pub weight: f64,
    /// 是否启用，默认启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
