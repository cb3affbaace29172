//! 覆盖存储
//!
//! 覆盖到期不需要后台清理：生效结果在每次读取时按当前时间计算，
//! 过期的覆盖自然失效，回落到主代理。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::{AllocationConfig, BusyRetryConfig};
use crate::database::with_busy_retry;
use crate::error::{AppError, AppResult};
use crate::models::{AuditEntry, Binding, EffectiveAssignment, EffectiveMode};
use crate::services::binding_registry::BindingRegistry;
use crate::services::clock::Clock;

/// 计算绑定在 `now` 时刻的生效节点与模式
pub fn effective(binding: &Binding, now: DateTime<Utc>) -> EffectiveAssignment {
    match (binding.override_endpoint_id, binding.override_expires_at) {
        (Some(endpoint_id), Some(expires_at)) if expires_at > now => EffectiveAssignment {
            endpoint_id: Some(endpoint_id),
            mode: EffectiveMode::Override,
        },
        _ => EffectiveAssignment {
            endpoint_id: binding.primary_endpoint_id,
            mode: EffectiveMode::Primary,
        },
    }
}

/// 校验覆盖有效期：必须为正且不超过配置上限
pub fn validate_ttl(ttl_ms: i64, max_ttl: Duration) -> AppResult<Duration> {
    if ttl_ms <= 0 {
        return Err(AppError::validation("覆盖有效期必须大于0"));
    }
    let ttl = Duration::from_millis(ttl_ms as u64);
    if ttl > max_ttl {
        return Err(AppError::validation(format!(
            "覆盖有效期不能超过{}毫秒",
            max_ttl.as_millis()
        )));
    }
    Ok(ttl)
}

/// 设置覆盖的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OverrideOutcome {
    pub binding_id: i64,
    pub override_endpoint_id: i64,
    pub override_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OverrideStore {
    registry: BindingRegistry,
    clock: Arc<dyn Clock>,
    config: AllocationConfig,
    retry: BusyRetryConfig,
}

impl OverrideStore {
    pub fn new(
        registry: BindingRegistry,
        clock: Arc<dyn Clock>,
        config: AllocationConfig,
        retry: BusyRetryConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            config,
            retry,
        }
    }

    /// 为单个绑定设置限时覆盖
    ///
    /// 绑定不存在返回 NotFound；节点不存在返回 NotFound；节点不是该池的活跃成员（成员与节点均启用）
    /// 或有效期越界返回 Validation。节点暂时不可达不影响覆盖。校验和写入在同一事务内完成，只修改覆盖字段。
    pub async fn set_override(
        &self,
        binding_id: i64,
        endpoint_id: i64,
        ttl_ms: i64,
        reason: Option<&str>,
        request_id: Option<&str>,
    ) -> AppResult<OverrideOutcome> {
        if binding_id <= 0 {
            return Err(AppError::validation("无效的绑定ID"));
        }
        if endpoint_id <= 0 {
            return Err(AppError::validation("无效的覆盖节点ID"));
        }
        let ttl = validate_ttl(ttl_ms, self.config.override_max_ttl)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::validation(format!("无效的覆盖有效期: {}", e)))?;

        with_busy_retry(&self.retry, || async {
            let now = self.clock.now();
            let expires_at = now + ttl;

            let mut tx = self.registry.begin().await?;

            let binding = BindingRegistry::find_binding(&mut tx, binding_id)
                .await?
                .ok_or_else(|| AppError::not_found("绑定不存在"))?;

            if BindingRegistry::find_endpoint(&mut tx, endpoint_id).await?.is_none() {
                return Err(AppError::not_found("代理节点不存在"));
            }

            if !BindingRegistry::is_active_member(&mut tx, binding.pool_id, endpoint_id).await? {
                warn!(
                    "覆盖节点不是代理池的活跃成员: binding_id={}, pool_id={}, endpoint_id={}",
                    binding_id, binding.pool_id, endpoint_id
                );
                return Err(AppError::validation("覆盖节点不在该代理池中或未启用"));
            }

            BindingRegistry::write_override(&mut tx, binding_id, Some((endpoint_id, expires_at)), now)
                .await?;

            let audit = AuditEntry::new("binding.override.set", "binding", binding_id)
                .with_request_id(request_id)
                .with_detail(json!({
                    "override_endpoint_id": endpoint_id,
                    "ttl_ms": ttl_ms,
                    "expires_at": expires_at,
                    "reason": reason.unwrap_or_default(),
                }));
            BindingRegistry::record_audit(&mut tx, &audit).await?;

            tx.commit().await?;

            info!(
                "已设置绑定覆盖: binding_id={}, endpoint_id={}, expires_at={}",
                binding_id, endpoint_id, expires_at
            );

            Ok(OverrideOutcome {
                binding_id,
                override_endpoint_id: endpoint_id,
                override_expires_at: expires_at,
            })
        })
        .await
    }

    /// 清除绑定的覆盖，对已无覆盖的绑定重复调用同样成功
    pub async fn clear_override(&self, binding_id: i64, request_id: Option<&str>) -> AppResult<i64> {
        if binding_id <= 0 {
            return Err(AppError::validation("无效的绑定ID"));
        }

        with_busy_retry(&self.retry, || async {
            let now = self.clock.now();
            let mut tx = self.registry.begin().await?;

            let binding = BindingRegistry::find_binding(&mut tx, binding_id)
                .await?
                .ok_or_else(|| AppError::not_found("绑定不存在"))?;

            if binding.override_endpoint_id.is_some() {
                BindingRegistry::write_override(&mut tx, binding_id, None, now).await?;
                let audit = AuditEntry::new("binding.override.clear", "binding", binding_id)
                    .with_request_id(request_id)
                    .with_detail(json!({
                        "previous_endpoint_id": binding.override_endpoint_id,
                    }));
                BindingRegistry::record_audit(&mut tx, &audit).await?;
                info!("已清除绑定覆盖: binding_id={}", binding_id);
            }

            tx.commit().await?;
            Ok(binding_id)
        })
        .await
    }
}
