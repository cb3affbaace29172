use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::config::BusyRetryConfig;
use crate::database::with_busy_retry;
use crate::error::{AppError, AppResult};
use crate::models::{AuditEntry, MembershipInput};
use crate::services::binding_registry::{BindingRegistry, MembershipChange};
use crate::services::clock::Clock;

/// 代理池成员写入
///
/// 权重与节点在这里校验，分配器读取到的成员数据默认已经合法。
pub struct MembershipWriter {
    registry: BindingRegistry,
    clock: Arc<dyn Clock>,
    retry: BusyRetryConfig,
}

/// 去掉重复的节点，保留首次出现的配置
fn dedup_items(items: Vec<MembershipInput>) -> Vec<MembershipInput> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.endpoint_id))
        .collect()
}

impl MembershipWriter {
    pub fn new(registry: BindingRegistry, clock: Arc<dyn Clock>, retry: BusyRetryConfig) -> Self {
        Self {
            registry,
            clock,
            retry,
        }
    }

    pub async fn replace_pool_memberships(
        &self,
        pool_id: i64,
        items: Vec<MembershipInput>,
        request_id: Option<&str>,
    ) -> AppResult<MembershipChange> {
        if pool_id <= 0 {
            return Err(AppError::validation("无效的代理池ID"));
        }
        for item in &items {
            item.validate()?;
        }
        let items = dedup_items(items);

        let change = with_busy_retry(&self.retry, || async {
            let now = self.clock.now();
            let mut tx = self.registry.begin().await?;

            if BindingRegistry::find_pool(&mut tx, pool_id).await?.is_none() {
                return Err(AppError::not_found("代理池不存在"));
            }
            for item in &items {
                if BindingRegistry::find_endpoint(&mut tx, item.endpoint_id).await?.is_none() {
                    return Err(AppError::validation(format!(
                        "未知的代理节点: {}",
                        item.endpoint_id
                    )));
                }
            }

            let change = BindingRegistry::replace_memberships(&mut tx, pool_id, &items, now).await?;

            let audit = AuditEntry::new("proxy_pool.endpoints.set", "proxy_pool", pool_id)
                .with_request_id(request_id)
                .with_detail(json!({ "items": items, "change": change }));
            BindingRegistry::record_audit(&mut tx, &audit).await?;

            tx.commit().await?;
            Ok(change)
        })
        .await?;

        info!(
            "代理池成员已更新: pool_id={}, created={}, updated={}, removed={}",
            pool_id, change.created, change.updated, change.removed
        );

        Ok(change)
    }
}
