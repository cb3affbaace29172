//! 重算协调器
//!
//! 同一代理池的重算互斥执行（读取-计算-写入整体持锁），不同代理池互不影响。
//! 严格模式容量不足时不写入任何数据，已有主代理与覆盖保持不变。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::{BusyRetryConfig, MAX_SLOTS_PER_ENDPOINT_LIMIT};
use crate::database::with_busy_retry;
use crate::error::{AppError, AppResult};
use crate::models::AuditEntry;
use crate::services::binding_registry::BindingRegistry;
use crate::services::capacity::CapacityModel;
use crate::services::clock::Clock;
use crate::services::planner::plan_allocation;

/// 按代理池ID划分的互斥锁
#[derive(Debug, Default)]
pub struct PoolLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl PoolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试获取代理池的重算锁，已被占用时立即返回冲突
    pub fn try_acquire(&self, pool_id: i64) -> AppResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| AppError::Internal("代理池锁表已损坏".to_string()))?;
            locks
                .entry(pool_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().map_err(|_| {
            AppError::Conflict(format!("代理池{}的绑定重算正在进行，请稍后重试", pool_id))
        })
    }
}

/// 重算参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecomputeParams {
    pub pool_id: i64,
    pub max_slots_per_endpoint: u32,
    pub strict: bool,
}

/// 重算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecomputeOutcome {
    pub pool_id: i64,
    /// 本次分配的凭据数
    pub recomputed: usize,
    pub strict: bool,
    /// 超出名义槽位的分配数，严格模式恒为0
    pub over_capacity_assigned: usize,
    pub capacity: u64,
    pub token_count: usize,
    pub endpoint_count: usize,
    pub max_slots_per_endpoint: u32,
    pub weight_sum: f64,
}

pub struct RecomputeCoordinator {
    registry: BindingRegistry,
    locks: PoolLocks,
    clock: Arc<dyn Clock>,
    retry: BusyRetryConfig,
}

impl RecomputeCoordinator {
    pub fn new(registry: BindingRegistry, clock: Arc<dyn Clock>, retry: BusyRetryConfig) -> Self {
        Self {
            registry,
            locks: PoolLocks::new(),
            clock,
            retry,
        }
    }

    pub fn locks(&self) -> &PoolLocks {
        &self.locks
    }

    /// 对整个代理池重新计算主代理
    pub async fn recompute(
        &self,
        params: RecomputeParams,
        request_id: Option<&str>,
    ) -> AppResult<RecomputeOutcome> {
        if params.pool_id <= 0 {
            return Err(AppError::validation("无效的代理池ID"));
        }
        if params.max_slots_per_endpoint == 0
            || params.max_slots_per_endpoint > MAX_SLOTS_PER_ENDPOINT_LIMIT
        {
            return Err(AppError::validation(format!(
                "max_slots_per_endpoint 必须在 1..={} 之间",
                MAX_SLOTS_PER_ENDPOINT_LIMIT
            )));
        }

        let _guard = self.locks.try_acquire(params.pool_id)?;

        let result = with_busy_retry(&self.retry, || self.recompute_locked(params, request_id)).await;

        match &result {
            Ok(outcome) => info!(
                "代理池绑定重算完成: pool_id={}, recomputed={}, strict={}, over_capacity={}, capacity={}",
                outcome.pool_id,
                outcome.recomputed,
                outcome.strict,
                outcome.over_capacity_assigned,
                outcome.capacity
            ),
            Err(AppError::CapacityShortfall(diag)) => warn!(
                "代理池容量不足，拒绝重算: pool_id={}, token_count={}, capacity={}",
                params.pool_id, diag.token_count, diag.capacity
            ),
            Err(e) => warn!("代理池绑定重算失败: pool_id={}, 错误={}", params.pool_id, e),
        }

        result
    }

    async fn recompute_locked(
        &self,
        params: RecomputeParams,
        request_id: Option<&str>,
    ) -> AppResult<RecomputeOutcome> {
        let now = self.clock.now();
        let mut tx = self.registry.begin().await?;

        if BindingRegistry::find_pool(&mut tx, params.pool_id).await?.is_none() {
            return Err(AppError::not_found("代理池不存在"));
        }

        let memberships = BindingRegistry::load_active_memberships(&mut tx, params.pool_id).await?;
        let credential_ids = BindingRegistry::load_enabled_credential_ids(&mut tx).await?;

        let model = CapacityModel::derive(&memberships, params.max_slots_per_endpoint);
        // 失败时事务随 tx 丢弃而回滚
        let plan = plan_allocation(&credential_ids, &model, params.strict)?;

        BindingRegistry::upsert_primary_assignments(&mut tx, params.pool_id, &plan.assignments, now)
            .await?;

        let outcome = RecomputeOutcome {
            pool_id: params.pool_id,
            recomputed: plan.assignments.len(),
            strict: params.strict,
            over_capacity_assigned: plan.over_capacity_assigned,
            capacity: plan.capacity,
            token_count: plan.token_count,
            endpoint_count: plan.endpoint_count,
            max_slots_per_endpoint: plan.max_slots_per_endpoint,
            weight_sum: plan.weight_sum,
        };

        let audit = AuditEntry::new("binding.recompute", "proxy_pool", params.pool_id)
            .with_request_id(request_id)
            .with_detail(json!(outcome));
        BindingRegistry::record_audit(&mut tx, &audit).await?;

        tx.commit().await?;
        Ok(outcome)
    }
}
