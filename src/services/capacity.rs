use serde::Serialize;

use crate::models::ActiveMembership;

/// 单个节点的槽位
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EndpointSlots {
    pub endpoint_id: i64,
    pub weight: f64,
    pub slots: u32,
}

/// 代理池容量模型
///
/// 每个节点的槽位为 `round(weight * max_slots_per_endpoint)`，池容量为槽位之和。
/// 只有槽位大于0的节点计入 `endpoint_count` 与 `weight_sum`。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityModel {
    /// 按节点ID升序排列
    pub slots: Vec<EndpointSlots>,
    pub weight_sum: f64,
    pub endpoint_count: usize,
    pub capacity: u64,
    pub max_slots_per_endpoint: u32,
}

impl CapacityModel {
    pub fn derive(memberships: &[ActiveMembership], max_slots_per_endpoint: u32) -> Self {
        let mut slots: Vec<EndpointSlots> = memberships
            .iter()
            .filter(|m| m.weight.is_finite() && m.weight > 0.0)
            .map(|m| {
                let raw = (m.weight * f64::from(max_slots_per_endpoint)).round();
                EndpointSlots {
                    endpoint_id: m.endpoint_id,
                    weight: m.weight,
                    slots: raw.min(f64::from(u32::MAX)) as u32,
                }
            })
            .filter(|s| s.slots > 0)
            .collect();
        slots.sort_by_key(|s| s.endpoint_id);
        slots.dedup_by_key(|s| s.endpoint_id);

        let weight_sum = slots.iter().map(|s| s.weight).sum();
        let capacity = slots.iter().map(|s| u64::from(s.slots)).sum();

        Self {
            endpoint_count: slots.len(),
            slots,
            weight_sum,
            capacity,
            max_slots_per_endpoint,
        }
    }

    pub fn slots_for(&self, endpoint_id: i64) -> u32 {
        self.slots
            .iter()
            .find(|s| s.endpoint_id == endpoint_id)
            .map(|s| s.slots)
            .unwrap_or(0)
    }
}
