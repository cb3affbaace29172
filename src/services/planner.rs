//! 分配规划器
//!
//! 按凭据ID升序依次分配：每次选择“剩余容量比例” `(slots - filled) / slots` 最大的节点，
//! 比例相同取节点ID较小者。槽位用尽后，宽松模式继续按同一规则（此时比例为负）
//! 在节点间循环分配，并统计超额分配数；严格模式直接拒绝整次分配。

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::services::capacity::CapacityModel;

/// 容量诊断信息，严格模式拒绝时返回给调用方
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CapacityDiagnostics {
    pub token_count: usize,
    pub endpoint_count: usize,
    pub max_slots_per_endpoint: u32,
    pub weight_sum: f64,
    pub capacity: u64,
}

/// 一次完整的分配结果
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    /// 凭据ID → 节点ID
    pub assignments: BTreeMap<i64, i64>,
    /// 超出节点名义槽位的分配数
    pub over_capacity_assigned: usize,
    pub token_count: usize,
    pub endpoint_count: usize,
    pub capacity: u64,
    pub weight_sum: f64,
    pub max_slots_per_endpoint: u32,
}

impl AllocationPlan {
    /// 各节点被分配的凭据数
    pub fn assigned_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for endpoint_id in self.assignments.values() {
            *counts.entry(*endpoint_id).or_insert(0) += 1;
        }
        counts
    }
}

impl CapacityModel {
    pub fn diagnostics(&self, token_count: usize) -> CapacityDiagnostics {
        CapacityDiagnostics {
            token_count,
            endpoint_count: self.endpoint_count,
            max_slots_per_endpoint: self.max_slots_per_endpoint,
            weight_sum: self.weight_sum,
            capacity: self.capacity,
        }
    }
}

/// 比较两个节点的剩余容量比例，交叉相乘避免浮点误差
fn compare_remaining(slots_a: u32, filled_a: u64, slots_b: u32, filled_b: u64) -> Ordering {
    let lhs = (i128::from(slots_a) - i128::from(filled_a)) * i128::from(slots_b);
    let rhs = (i128::from(slots_b) - i128::from(filled_b)) * i128::from(slots_a);
    lhs.cmp(&rhs)
}

/// 计算凭据到节点的分配
///
/// 严格模式下需求超过容量时返回 [`AppError::CapacityShortfall`]，不产生任何部分结果。
pub fn plan_allocation(
    credential_ids: &[i64],
    model: &CapacityModel,
    strict: bool,
) -> AppResult<AllocationPlan> {
    let mut ordered = credential_ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    let token_count = ordered.len();
    let mut plan = AllocationPlan {
        assignments: BTreeMap::new(),
        over_capacity_assigned: 0,
        token_count,
        endpoint_count: model.endpoint_count,
        capacity: model.capacity,
        weight_sum: model.weight_sum,
        max_slots_per_endpoint: model.max_slots_per_endpoint,
    };

    if ordered.is_empty() {
        return Ok(plan);
    }

    if strict && token_count as u64 > model.capacity {
        return Err(AppError::CapacityShortfall(model.diagnostics(token_count)));
    }

    if model.slots.is_empty() {
        return Err(AppError::validation(
            "宽松模式下代理池没有任何可分配槽位（无启用且可达、权重大于0的节点），无法超额分配",
        ));
    }

    let mut filled = vec![0u64; model.slots.len()];

    for credential_id in ordered {
        let mut best = 0usize;
        for idx in 1..model.slots.len() {
            let ord = compare_remaining(
                model.slots[idx].slots,
                filled[idx],
                model.slots[best].slots,
                filled[best],
            );
            // 相同比例保留ID较小者（slots 已按ID升序）
            if ord == Ordering::Greater {
                best = idx;
            }
        }

        if filled[best] >= u64::from(model.slots[best].slots) {
            plan.over_capacity_assigned += 1;
        }
        filled[best] += 1;
        plan.assignments.insert(credential_id, model.slots[best].endpoint_id);
    }

    debug!(
        token_count,
        capacity = model.capacity,
        over_capacity = plan.over_capacity_assigned,
        "allocation planned"
    );

    Ok(plan)
}
