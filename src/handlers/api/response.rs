//! 响应封装：成功体与错误体都带上请求关联ID

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// 请求关联ID的请求头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// 恒为 false
    pub ok: bool,
    /// 错误码（CAPACITY_SHORTFALL / VALIDATION_ERROR / NOT_FOUND / CONFLICT / INTERNAL_ERROR）
    pub code: String,
    /// 错误信息
    pub message: String,
    /// 请求关联ID
    pub request_id: String,
    /// 容量不足时的诊断信息
    #[schema(value_type = Object)]
    pub details: Option<Value>,
}

/// 当前请求的关联ID
///
/// 由 `SetRequestIdLayer` 写入请求头；缺失时（例如未挂载该中间件）现场生成。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(RequestId(id))
    }
}

fn status_of(err: &AppError) -> StatusCode {
    match err {
        AppError::CapacityShortfall(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 把服务层错误转换为 HTTP 响应
pub fn error_response(err: AppError, request_id: &RequestId) -> Response {
    let status = status_of(&err);
    let details = match &err {
        AppError::CapacityShortfall(diag) => serde_json::to_value(diag).ok(),
        _ => None,
    };
    let message = match &err {
        // 存储层细节只写日志
        AppError::Database(e) => {
            error!("数据库错误: request_id={}, 错误={}", request_id.as_str(), e);
            "服务器内部错误".to_string()
        }
        AppError::Internal(msg) => {
            error!("内部错误: request_id={}, 错误={}", request_id.as_str(), msg);
            "服务器内部错误".to_string()
        }
        other => {
            warn!("请求被拒绝: request_id={}, code={}, {}", request_id.as_str(), other.code(), other);
            other.to_string()
        }
    };

    let body = ErrorResponse {
        ok: false,
        code: err.code().to_string(),
        message,
        request_id: request_id.0.clone(),
        details,
    };
    (status, Json(body)).into_response()
}

/// 成功响应：在数据对象上附加 `ok` 与 `request_id`
pub fn ok_response<T: Serialize>(status: StatusCode, request_id: &RequestId, data: &T) -> Response {
    match serde_json::to_value(data) {
        Ok(Value::Object(mut map)) => {
            map.insert("ok".to_string(), Value::Bool(true));
            map.insert("request_id".to_string(), Value::String(request_id.0.clone()));
            (status, Json(Value::Object(map))).into_response()
        }
        Ok(other) => (
            status,
            Json(json!({ "ok": true, "request_id": request_id.0, "data": other })),
        )
            .into_response(),
        Err(e) => error_response(AppError::Internal(format!("序列化响应失败: {}", e)), request_id),
    }
}
