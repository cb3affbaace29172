use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::AppError;
use crate::handlers::api::response::{error_response, ok_response, RequestId};
use crate::routes::api::AppState;
use crate::services::CleanupOptions;

fn default_true() -> bool {
    true
}

/// 移除代理节点请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RemoveEndpointRequest {
    /// 是否重算受影响的代理池，默认是
    #[serde(default = "default_true")]
    pub recompute: bool,
    /// 重算时是否严格准入，默认否
    #[serde(default)]
    pub strict: bool,
    /// 重算使用的单代理最多绑定令牌数（可选，默认取配置）
    #[validate(range(min = 1, max = 1000))]
    pub max_slots_per_endpoint: Option<u32>,
}

impl Default for RemoveEndpointRequest {
    fn default() -> Self {
        Self {
            recompute: true,
            strict: false,
            max_slots_per_endpoint: None,
        }
    }
}

/// 空请求体使用默认选项；非空时必须是合法的JSON，不看 Content-Type
fn parse_remove_request(body: &[u8]) -> Result<RemoveEndpointRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RemoveEndpointRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("无效的请求体: {}", e)))
}

/// 移除代理节点并级联清理覆盖与成员关系
#[utoipa::path(
    post,
    path = "/v1/endpoints/{endpoint_id}/remove",
    params(("endpoint_id" = i64, Path, description = "代理节点ID")),
    request_body = RemoveEndpointRequest,
    responses(
        (status = 200, description = "节点已移除，重算失败记录在 warnings 中", body = CleanupOutcome),
        (status = 400, description = "请求体不是合法的JSON或参数越界", body = ErrorResponse),
        (status = 404, description = "代理节点不存在", body = ErrorResponse),
    ),
    tag = "endpoints"
)]
pub async fn remove_endpoint(
    State(state): State<AppState>,
    request_id: RequestId,
    endpoint_id: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> Response {
    let Path(endpoint_id) = match endpoint_id {
        Ok(p) => p,
        Err(_) => return error_response(AppError::validation("无效的代理节点ID"), &request_id),
    };
    let request = match parse_remove_request(&body) {
        Ok(r) => r,
        Err(e) => return error_response(e, &request_id),
    };
    info!("收到移除代理节点请求: endpoint_id={}, {:?}", endpoint_id, request);

    if let Err(e) = request.validate() {
        return error_response(e.into(), &request_id);
    }

    let options = CleanupOptions {
        recompute: request.recompute,
        strict: request.strict,
        max_slots_per_endpoint: request
            .max_slots_per_endpoint
            .unwrap_or(state.allocation.default_max_slots_per_endpoint),
    };

    match state
        .cleanup
        .remove_endpoint(endpoint_id, options, Some(request_id.as_str()))
        .await
    {
        Ok(outcome) => ok_response(StatusCode::OK, &request_id, &outcome),
        Err(e) => error_response(e, &request_id),
    }
}
