use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Json, Path, State,
    },
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::handlers::api::response::{error_response, ok_response, RequestId};
use crate::models::MembershipInput;
use crate::routes::api::AppState;

/// 替换代理池成员请求
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplaceEndpointsRequest {
    /// 新的成员列表，未列出的已有成员会被移除
    pub items: Vec<MembershipInput>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReplaceEndpointsResponse {
    pub pool_id: i64,
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

/// 替换代理池的成员及权重
#[utoipa::path(
    put,
    path = "/v1/pools/{pool_id}/endpoints",
    params(("pool_id" = i64, Path, description = "代理池ID")),
    request_body = ReplaceEndpointsRequest,
    responses(
        (status = 200, description = "成员已更新", body = ReplaceEndpointsResponse),
        (status = 400, description = "权重越界或节点不存在", body = ErrorResponse),
        (status = 404, description = "代理池不存在", body = ErrorResponse),
    ),
    tag = "pools"
)]
pub async fn replace_pool_endpoints(
    State(state): State<AppState>,
    request_id: RequestId,
    pool_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReplaceEndpointsRequest>, JsonRejection>,
) -> Response {
    let Path(pool_id) = match pool_id {
        Ok(p) => p,
        Err(_) => return error_response(AppError::validation("无效的代理池ID"), &request_id),
    };
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return error_response(AppError::validation(e.body_text()), &request_id),
    };
    info!(
        "收到替换代理池成员请求: pool_id={}, 成员数={}",
        pool_id,
        request.items.len()
    );

    match state
        .memberships
        .replace_pool_memberships(pool_id, request.items, Some(request_id.as_str()))
        .await
    {
        Ok(change) => ok_response(
            StatusCode::OK,
            &request_id,
            &ReplaceEndpointsResponse {
                pool_id,
                created: change.created,
                updated: change.updated,
                removed: change.removed,
            },
        ),
        Err(e) => error_response(e, &request_id),
    }
}

/// 查询凭据在代理池中当前使用的代理
#[utoipa::path(
    get,
    path = "/v1/pools/{pool_id}/credentials/{credential_id}/route",
    params(
        ("pool_id" = i64, Path, description = "代理池ID"),
        ("credential_id" = i64, Path, description = "凭据ID"),
    ),
    responses(
        (status = 200, description = "当前生效的代理，尚未分配时 endpoint 为空", body = RouteResolution),
        (status = 404, description = "代理池或凭据不存在", body = ErrorResponse),
    ),
    tag = "pools"
)]
pub async fn resolve_route(
    State(state): State<AppState>,
    request_id: RequestId,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> Response {
    let Path((pool_id, credential_id)) = match ids {
        Ok(p) => p,
        Err(_) => return error_response(AppError::validation("无效的代理池或凭据ID"), &request_id),
    };

    match state.routes.resolve(pool_id, credential_id).await {
        Ok(route) => ok_response(StatusCode::OK, &request_id, &route),
        Err(e) => error_response(e, &request_id),
    }
}
