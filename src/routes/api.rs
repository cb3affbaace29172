use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AllocationConfig, BusyRetryConfig};
use crate::handlers::api::{
    bindings::{
        clear_override, list_bindings, recompute_bindings, set_override, ClearOverrideResponse,
        ListBindingsResponse, RecomputeRequest, SetOverrideRequest,
    },
    endpoints::{remove_endpoint, RemoveEndpointRequest},
    pools::{replace_pool_endpoints, resolve_route, ReplaceEndpointsRequest, ReplaceEndpointsResponse},
    response::ErrorResponse,
};
use crate::models::{CredentialRef, EffectiveMode, EndpointSummary, MembershipInput, PoolRef};
use crate::services::{
    BindingRegistry, BindingView, CleanupOutcome, Clock, EndpointCleanup, MembershipWriter,
    OverrideOutcome, OverrideStore, PoolSummary, RecomputeCoordinator, RecomputeOutcome,
    RouteResolution, RouteResolver,
};
use crate::services::planner::CapacityDiagnostics;

/// 请求体大小上限
const BODY_LIMIT_BYTES: usize = 1024 * 1024;
/// 单个请求的处理超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// API文档
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::api::bindings::list_bindings,
        crate::handlers::api::bindings::recompute_bindings,
        crate::handlers::api::bindings::set_override,
        crate::handlers::api::bindings::clear_override,
        crate::handlers::api::pools::replace_pool_endpoints,
        crate::handlers::api::pools::resolve_route,
        crate::handlers::api::endpoints::remove_endpoint
    ),
    components(
        schemas(
            ErrorResponse,
            RecomputeRequest,
            RecomputeOutcome,
            CapacityDiagnostics,
            SetOverrideRequest,
            OverrideOutcome,
            ClearOverrideResponse,
            ListBindingsResponse,
            BindingView,
            PoolSummary,
            CredentialRef,
            PoolRef,
            EndpointSummary,
            EffectiveMode,
            ReplaceEndpointsRequest,
            ReplaceEndpointsResponse,
            MembershipInput,
            RouteResolution,
            RemoveEndpointRequest,
            CleanupOutcome
        )
    ),
    tags(
        (name = "bindings", description = "凭据-代理绑定的重算与覆盖"),
        (name = "pools", description = "代理池成员与路由查询"),
        (name = "endpoints", description = "代理节点清理")
    )
)]
pub struct ApiDoc;

// 应用程序状态
#[derive(Clone)]
pub struct AppState {
    pub registry: BindingRegistry,
    pub coordinator: Arc<RecomputeCoordinator>,
    pub overrides: OverrideStore,
    pub memberships: Arc<MembershipWriter>,
    pub routes: Arc<RouteResolver>,
    pub cleanup: Arc<EndpointCleanup>,
    pub clock: Arc<dyn Clock>,
    pub allocation: AllocationConfig,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        allocation: AllocationConfig,
        retry: BusyRetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = BindingRegistry::new(db);
        let coordinator = Arc::new(RecomputeCoordinator::new(
            registry.clone(),
            clock.clone(),
            retry.clone(),
        ));
        let overrides = OverrideStore::new(
            registry.clone(),
            clock.clone(),
            allocation.clone(),
            retry.clone(),
        );
        let memberships = Arc::new(MembershipWriter::new(
            registry.clone(),
            clock.clone(),
            retry.clone(),
        ));
        let routes = Arc::new(RouteResolver::new(registry.clone(), clock.clone(), retry.clone()));
        let cleanup = Arc::new(EndpointCleanup::new(
            registry.clone(),
            coordinator.clone(),
            clock.clone(),
            retry,
        ));

        Self {
            registry,
            coordinator,
            overrides,
            memberships,
            routes,
            cleanup,
            clock,
            allocation,
        }
    }
}

// 配置API路由
pub fn app_routes(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive());

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/healthz", get(health_check))
        // 绑定
        .route("/v1/bindings", get(list_bindings))
        .route("/v1/bindings/recompute", post(recompute_bindings))
        .route("/v1/bindings/:binding_id/override", post(set_override))
        .route("/v1/bindings/:binding_id/clear-override", post(clear_override))
        // 代理池
        .route("/v1/pools/:pool_id/endpoints", put(replace_pool_endpoints))
        .route(
            "/v1/pools/:pool_id/credentials/:credential_id/route",
            get(resolve_route),
        )
        // 代理节点
        .route("/v1/endpoints/:endpoint_id/remove", post(remove_endpoint))
        .layer(middleware)
        .with_state(state)
}

// 简单的健康检查API
async fn health_check() -> &'static str {
    "OK"
}
