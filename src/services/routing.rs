use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::config::BusyRetryConfig;
use crate::database::with_busy_retry;
use crate::error::{AppError, AppResult};
use crate::models::{EffectiveMode, EndpointSummary};
use crate::services::binding_registry::BindingRegistry;
use crate::services::clock::Clock;
use crate::services::override_store::effective;

/// 凭据在某个代理池中的当前路由
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteResolution {
    pub binding_id: i64,
    pub credential_id: i64,
    pub pool_id: i64,
    pub effective_mode: EffectiveMode,
    /// 尚未分配时为空
    pub endpoint: Option<EndpointSummary>,
    /// 节点当前是否启用且可达，不做故障切换
    pub available: bool,
}

/// 请求路由时的读取路径；凭据第一次出现在代理池时创建空绑定
pub struct RouteResolver {
    registry: BindingRegistry,
    clock: Arc<dyn Clock>,
    retry: BusyRetryConfig,
}

impl RouteResolver {
    pub fn new(registry: BindingRegistry, clock: Arc<dyn Clock>, retry: BusyRetryConfig) -> Self {
        Self {
            registry,
            clock,
            retry,
        }
    }

    pub async fn resolve(&self, pool_id: i64, credential_id: i64) -> AppResult<RouteResolution> {
        if pool_id <= 0 || credential_id <= 0 {
            return Err(AppError::validation("无效的代理池或凭据ID"));
        }

        with_busy_retry(&self.retry, || async {
            let now = self.clock.now();
            let mut tx = self.registry.begin().await?;

            if BindingRegistry::find_pool(&mut tx, pool_id).await?.is_none() {
                return Err(AppError::not_found("代理池不存在"));
            }
            if BindingRegistry::find_credential(&mut tx, credential_id).await?.is_none() {
                return Err(AppError::not_found("凭据不存在"));
            }

            let binding = BindingRegistry::ensure_binding(&mut tx, credential_id, pool_id, now).await?;
            let eff = effective(&binding, now);

            let endpoint = match eff.endpoint_id {
                Some(endpoint_id) => BindingRegistry::find_endpoint(&mut tx, endpoint_id).await?,
                None => None,
            };

            tx.commit().await?;

            Ok(RouteResolution {
                binding_id: binding.id,
                credential_id,
                pool_id,
                effective_mode: eff.mode,
                available: endpoint.as_ref().map(|e| e.is_available()).unwrap_or(false),
                endpoint: endpoint.map(EndpointSummary::from),
            })
        })
        .await
    }
}
