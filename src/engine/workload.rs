// ==========================================
// 临期库存应急调拨系统 - 配送员负荷评分引擎
// ==========================================
// 红线: 负荷为派生数据,每个周期从分派历史重算,不是事实来源
// 注意: 紧急分桶按 (deadline − assigned_at) 天数,与有效期风险分级无关
// ==========================================
// 分桶: ≤1天 critical; ≤3天 high; 其他 low; expired 为预留槽位
// 评分: 10·critical + 5·high + 1·low + 15·expired + 0.1·总数量
// ==========================================

use crate::domain::assignment::EmergencyAssignment;
use crate::domain::dispenser::{Dispenser, DispenserWorkload};
use crate::domain::types::UrgencyBucket;
use std::collections::HashMap;
use tracing::instrument;

const CRITICAL_LEAD_DAYS: f64 = 1.0;
const HIGH_LEAD_DAYS: f64 = 3.0;

const WEIGHT_CRITICAL: f64 = 10.0;
const WEIGHT_HIGH: f64 = 5.0;
const WEIGHT_LOW: f64 = 1.0;
const WEIGHT_EXPIRED: f64 = 15.0;
const WEIGHT_QUANTITY: f64 = 0.1;

// ==========================================
// WorkloadScorer - 负荷评分引擎
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadScorer;

impl WorkloadScorer {
    pub fn new() -> Self {
        Self
    }

    /// 按交付提前量分桶
    pub fn urgency_bucket(&self, assignment: &EmergencyAssignment) -> UrgencyBucket {
        let lead_days = assignment.lead_time_days();
        if lead_days <= CRITICAL_LEAD_DAYS {
            UrgencyBucket::Critical
        } else if lead_days <= HIGH_LEAD_DAYS {
            UrgencyBucket::High
        } else {
            UrgencyBucket::Low
        }
    }

    /// 负荷评分公式
    pub fn score(&self, workload: &DispenserWorkload) -> f64 {
        WEIGHT_CRITICAL * workload.critical_count as f64
            + WEIGHT_HIGH * workload.high_count as f64
            + WEIGHT_LOW * workload.low_count as f64
            + WEIGHT_EXPIRED * workload.expired_count as f64
            + WEIGHT_QUANTITY * workload.total_quantity as f64
    }

    /// 计算配送员负荷,按评分升序输出（负荷最轻在前,同分按 ID）
    ///
    /// 历史中不属于 `dispensers` 的记录被忽略；无历史的配送员评分为 0
    #[instrument(skip(self, dispensers, history), fields(dispensers = dispensers.len(), history = history.len()))]
    pub fn compute(
        &self,
        dispensers: &[Dispenser],
        history: &[EmergencyAssignment],
    ) -> Vec<DispenserWorkload> {
        let mut by_id: HashMap<&str, DispenserWorkload> = dispensers
            .iter()
            .map(|d| (d.dispenser_id.as_str(), DispenserWorkload::empty(&d.dispenser_id)))
            .collect();

        for assignment in history {
            let Some(workload) = by_id.get_mut(assignment.dispenser_id.as_str()) else {
                continue;
            };
            match self.urgency_bucket(assignment) {
                UrgencyBucket::Critical => workload.critical_count += 1,
                UrgencyBucket::High => workload.high_count += 1,
                UrgencyBucket::Low => workload.low_count += 1,
                UrgencyBucket::Expired => workload.expired_count += 1,
            }
            workload.total_quantity += assignment.assigned_quantity.max(0);
        }

        let mut workloads: Vec<DispenserWorkload> = by_id
            .into_values()
            .map(|mut w| {
                w.workload_score = self.score(&w);
                w
            })
            .collect();

        sort_least_burdened_first(&mut workloads);
        workloads
    }
}

/// 评分升序,同分按配送员 ID 升序（保证确定性）
pub fn sort_least_burdened_first(workloads: &mut [DispenserWorkload]) {
    workloads.sort_by(|a, b| {
        a.workload_score
            .total_cmp(&b.workload_score)
            .then_with(|| a.dispenser_id.cmp(&b.dispenser_id))
    });
}
