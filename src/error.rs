//! 绑定分配服务的错误类型

use thiserror::Error;

use crate::services::planner::CapacityDiagnostics;

/// 服务层统一的结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 服务层错误
///
/// 前四类为调用方可处理的业务错误，均直接返回给调用方，引擎内部不做重试。
#[derive(Debug, Error)]
pub enum AppError {
    /// 严格模式下需求超过容量
    #[error("代理容量不足（请增加节点或调高单代理最多绑定令牌数）")]
    CapacityShortfall(CapacityDiagnostics),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// 同一代理池的重算正在进行，稍后重试即可
    #[error("{0}")]
    Conflict(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// 对外暴露的错误码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::CapacityShortfall(_) => "CAPACITY_SHORTFALL",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("请求参数无效: {}", errors))
    }
}
