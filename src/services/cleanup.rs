//! 节点移除的级联清理
//!
//! 禁用节点、清除指向它的覆盖、删除其成员关系（同一事务），
//! 然后按需对受影响的代理池重算；单个池重算失败只记为警告。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::BusyRetryConfig;
use crate::database::with_busy_retry;
use crate::error::{AppError, AppResult};
use crate::models::AuditEntry;
use crate::services::binding_registry::BindingRegistry;
use crate::services::clock::Clock;
use crate::services::recompute::{RecomputeCoordinator, RecomputeOutcome, RecomputeParams};

/// 清理选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    pub recompute: bool,
    pub strict: bool,
    pub max_slots_per_endpoint: u32,
}

/// 清理结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupOutcome {
    pub endpoint_id: i64,
    pub overrides_cleared: u64,
    pub memberships_removed: usize,
    pub affected_pool_ids: Vec<i64>,
    pub recomputes: Vec<RecomputeOutcome>,
    pub warnings: Vec<String>,
}

pub struct EndpointCleanup {
    registry: BindingRegistry,
    coordinator: Arc<RecomputeCoordinator>,
    clock: Arc<dyn Clock>,
    retry: BusyRetryConfig,
}

impl EndpointCleanup {
    pub fn new(
        registry: BindingRegistry,
        coordinator: Arc<RecomputeCoordinator>,
        clock: Arc<dyn Clock>,
        retry: BusyRetryConfig,
    ) -> Self {
        Self {
            registry,
            coordinator,
            clock,
            retry,
        }
    }

    pub async fn remove_endpoint(
        &self,
        endpoint_id: i64,
        options: CleanupOptions,
        request_id: Option<&str>,
    ) -> AppResult<CleanupOutcome> {
        if endpoint_id <= 0 {
            return Err(AppError::validation("无效的代理节点ID"));
        }

        let (overrides_cleared, affected_pool_ids) = with_busy_retry(&self.retry, || async {
            let now = self.clock.now();
            let mut tx = self.registry.begin().await?;

            if BindingRegistry::find_endpoint(&mut tx, endpoint_id).await?.is_none() {
                return Err(AppError::not_found("代理节点不存在"));
            }

            BindingRegistry::disable_endpoint(&mut tx, endpoint_id, now).await?;
            let cleared = BindingRegistry::clear_overrides_for_endpoint(&mut tx, endpoint_id, now).await?;
            let pools = BindingRegistry::remove_memberships_for_endpoint(&mut tx, endpoint_id).await?;

            let audit = AuditEntry::new("proxy_endpoint.remove", "proxy_endpoint", endpoint_id)
                .with_request_id(request_id)
                .with_detail(json!({
                    "overrides_cleared": cleared,
                    "affected_pool_ids": pools,
                }));
            BindingRegistry::record_audit(&mut tx, &audit).await?;

            tx.commit().await?;
            Ok((cleared, pools))
        })
        .await?;

        info!(
            "代理节点已移除: endpoint_id={}, overrides_cleared={}, pools={:?}",
            endpoint_id, overrides_cleared, affected_pool_ids
        );

        let mut recomputes = Vec::new();
        let mut warnings = Vec::new();

        if options.recompute {
            for pool_id in &affected_pool_ids {
                let params = RecomputeParams {
                    pool_id: *pool_id,
                    max_slots_per_endpoint: options.max_slots_per_endpoint,
                    strict: options.strict,
                };
                match self.coordinator.recompute(params, request_id).await {
                    Ok(outcome) => recomputes.push(outcome),
                    Err(e) => {
                        warn!("代理池{}重算绑定失败: {}", pool_id, e);
                        warnings.push(format!("pool#{} 重算绑定失败: {}", pool_id, e));
                    }
                }
            }
        }

        Ok(CleanupOutcome {
            endpoint_id,
            overrides_cleared,
            memberships_removed: affected_pool_ids.len(),
            affected_pool_ids,
            recomputes,
            warnings,
        })
    }
}
