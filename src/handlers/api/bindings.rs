use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::config::MAX_SLOTS_PER_ENDPOINT_LIMIT;
use crate::error::{AppError, AppResult};
use crate::handlers::api::response::{error_response, ok_response, RequestId};
use crate::routes::api::AppState;
use crate::services::{BindingView, PoolSummary, RecomputeParams};

/// 重算绑定请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RecomputeRequest {
    /// 代理池ID
    #[validate(range(min = 1))]
    pub pool_id: i64,
    /// 单代理最多绑定令牌数（可选，默认取配置）
    #[validate(range(min = 1, max = 1000))]
    pub max_slots_per_endpoint: Option<u32>,
    /// 是否严格准入（可选，默认取配置）
    pub strict: Option<bool>,
}

/// 设置覆盖请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SetOverrideRequest {
    /// 覆盖使用的代理节点ID
    #[validate(range(min = 1))]
    pub override_endpoint_id: i64,
    /// 有效期（毫秒）
    #[validate(range(min = 1))]
    pub ttl_ms: i64,
    /// 原因，最多200字符
    #[serde(default)]
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListBindingsQuery {
    /// 代理池ID
    pub pool_id: i64,
}

/// 绑定列表响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ListBindingsResponse {
    pub pool: PoolSummary,
    pub items: Vec<BindingView>,
}

/// 清除覆盖响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ClearOverrideResponse {
    pub binding_id: i64,
}

/// 列出代理池的绑定
#[utoipa::path(
    get,
    path = "/v1/bindings",
    params(ListBindingsQuery),
    responses(
        (status = 200, description = "绑定列表，生效节点按当前时间计算", body = ListBindingsResponse),
        (status = 400, description = "请求参数错误", body = ErrorResponse),
        (status = 404, description = "代理池不存在", body = ErrorResponse),
    ),
    tag = "bindings"
)]
pub async fn list_bindings(
    State(state): State<AppState>,
    request_id: RequestId,
    query: Result<Query<ListBindingsQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return error_response(AppError::validation(e.body_text()), &request_id),
    };
    if query.pool_id <= 0 {
        return error_response(AppError::validation("无效的代理池ID"), &request_id);
    }

    let result: AppResult<ListBindingsResponse> = async {
        if !state.registry.pool_exists(query.pool_id).await? {
            return Err(AppError::not_found("代理池不存在"));
        }
        let items = state
            .registry
            .list_pool_bindings(query.pool_id, state.clock.now())
            .await?;
        let pool = state.registry.pool_summary(query.pool_id).await?;
        Ok(ListBindingsResponse { pool, items })
    }
    .await;

    match result {
        Ok(body) => ok_response(StatusCode::OK, &request_id, &body),
        Err(e) => error_response(e, &request_id),
    }
}

/// 重新计算代理池的主代理分配
#[utoipa::path(
    post,
    path = "/v1/bindings/recompute",
    request_body = RecomputeRequest,
    responses(
        (status = 200, description = "重算完成", body = RecomputeOutcome),
        (status = 400, description = "参数错误或严格模式容量不足", body = ErrorResponse),
        (status = 404, description = "代理池不存在", body = ErrorResponse),
        (status = 409, description = "同一代理池的重算正在进行", body = ErrorResponse),
    ),
    tag = "bindings"
)]
pub async fn recompute_bindings(
    State(state): State<AppState>,
    request_id: RequestId,
    payload: Result<Json<RecomputeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return error_response(AppError::validation(e.body_text()), &request_id),
    };
    info!("收到重算绑定请求: {:?}", request);

    if let Err(e) = request.validate() {
        return error_response(e.into(), &request_id);
    }

    let params = RecomputeParams {
        pool_id: request.pool_id,
        max_slots_per_endpoint: request
            .max_slots_per_endpoint
            .unwrap_or(state.allocation.default_max_slots_per_endpoint)
            .min(MAX_SLOTS_PER_ENDPOINT_LIMIT),
        strict: request.strict.unwrap_or(state.allocation.default_strict),
    };

    match state
        .coordinator
        .recompute(params, Some(request_id.as_str()))
        .await
    {
        Ok(outcome) => ok_response(StatusCode::OK, &request_id, &outcome),
        Err(e) => error_response(e, &request_id),
    }
}

/// 为绑定设置限时覆盖
#[utoipa::path(
    post,
    path = "/v1/bindings/{binding_id}/override",
    params(("binding_id" = i64, Path, description = "绑定ID")),
    request_body = SetOverrideRequest,
    responses(
        (status = 200, description = "覆盖已设置", body = OverrideOutcome),
        (status = 400, description = "节点不在代理池中或有效期越界", body = ErrorResponse),
        (status = 404, description = "绑定或节点不存在", body = ErrorResponse),
    ),
    tag = "bindings"
)]
pub async fn set_override(
    State(state): State<AppState>,
    request_id: RequestId,
    binding_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SetOverrideRequest>, JsonRejection>,
) -> Response {
    let Path(binding_id) = match binding_id {
        Ok(p) => p,
        Err(_) => return error_response(AppError::validation("无效的绑定ID"), &request_id),
    };
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return error_response(AppError::validation(e.body_text()), &request_id),
    };
    info!("收到设置覆盖请求: binding_id={}, {:?}", binding_id, request);

    if let Err(e) = request.validate() {
        return error_response(e.into(), &request_id);
    }

    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    match state
        .overrides
        .set_override(
            binding_id,
            request.override_endpoint_id,
            request.ttl_ms,
            reason,
            Some(request_id.as_str()),
        )
        .await
    {
        Ok(outcome) => ok_response(StatusCode::OK, &request_id, &outcome),
        Err(e) => error_response(e, &request_id),
    }
}

/// 清除绑定的覆盖
#[utoipa::path(
    post,
    path = "/v1/bindings/{binding_id}/clear-override",
    params(("binding_id" = i64, Path, description = "绑定ID")),
    responses(
        (status = 200, description = "覆盖已清除（重复清除同样成功）", body = ClearOverrideResponse),
        (status = 404, description = "绑定不存在", body = ErrorResponse),
    ),
    tag = "bindings"
)]
pub async fn clear_override(
    State(state): State<AppState>,
    request_id: RequestId,
    binding_id: Result<Path<i64>, PathRejection>,
) -> Response {
    let Path(binding_id) = match binding_id {
        Ok(p) => p,
        Err(_) => return error_response(AppError::validation("无效的绑定ID"), &request_id),
    };
    info!("收到清除覆盖请求: binding_id={}", binding_id);

    match state
        .overrides
        .clear_override(binding_id, Some(request_id.as_str()))
        .await
    {
        Ok(binding_id) => ok_response(StatusCode::OK, &request_id, &ClearOverrideResponse { binding_id }),
        Err(e) => error_response(e, &request_id),
    }
}
