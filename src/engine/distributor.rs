// ==========================================
// 临期库存应急调拨系统 - 公平分派引擎
// ==========================================
// 红线: 已过期库存不进入本子系统
// 红线: 每个类别 Σ目标 = Q,每人 ∈ {⌊Q/D⌋, ⌊Q/D⌋+1},余数给负荷最轻者
// ==========================================
// 两阶段:
// 1) propose: 按风险类别汇总数量,计算 [配送员 × 类别 → 目标数量]
// 2) execute: 按固定优先级逐类别,把目标轮转绑定到具体库存条目
//    剩余目标以显式累加器 (AllocationAccumulator) 贯穿轮转并返回
// ==========================================

use crate::domain::assignment::AssignmentRequest;
use crate::domain::dispenser::DispenserWorkload;
use crate::domain::stock::StockItem;
use crate::domain::types::RiskLevel;
use crate::engine::workload::{sort_least_burdened_first, WorkloadScorer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::instrument;

/// 分派引擎错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("当前网点没有可用配送员")]
    NoDispensersAvailable,

    #[error("分配表不一致: {0}")]
    InconsistentTable(String),
}

// ==========================================
// 分配表 (propose 输出)
// ==========================================

/// 单个配送员在某类别下的目标数量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenserTarget {
    pub dispenser_id: String,
    pub quantity: i64,
}

/// 某风险类别的分配结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAllocation {
    pub risk_level: RiskLevel,
    pub total_quantity: i64,          // Q
    pub items: Vec<StockItem>,        // 类别内待绑定的库存条目
    pub targets: Vec<DispenserTarget>, // 按负荷升序
}

/// 未参与分派的库存条目及原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotEmergency,
    Unclassified,
    Expired,
    NotDistributable, // medium-high / medium
    NoQuantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub stock_item_id: String,
    pub risk_level: Option<RiskLevel>,
    pub reason: SkipReason,
}

/// 分配表: [配送员 × 类别 → 目标数量]，尚未绑定到具体条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationTable {
    pub workloads: Vec<DispenserWorkload>, // 计算时的负荷快照（升序）
    pub categories: BTreeMap<RiskLevel, CategoryAllocation>,
    pub skipped_items: Vec<SkippedItem>,
}

impl AllocationTable {
    /// 某配送员在某类别下的目标
    pub fn target_for(&self, risk_level: RiskLevel, dispenser_id: &str) -> i64 {
        self.categories
            .get(&risk_level)
            .and_then(|c| c.targets.iter().find(|t| t.dispenser_id == dispenser_id))
            .map(|t| t.quantity)
            .unwrap_or(0)
    }

    pub fn total_quantity(&self) -> i64 {
        self.categories.values().map(|c| c.total_quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

// ==========================================
// 累加器 (execute 中间状态)
// ==========================================

/// 各 (类别, 配送员) 剩余目标
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationAccumulator {
    remaining: HashMap<RiskLevel, HashMap<String, i64>>,
}

impl AllocationAccumulator {
    pub fn from_table(table: &AllocationTable) -> Self {
        let remaining = table
            .categories
            .iter()
            .map(|(level, cat)| {
                let per_dispenser = cat
                    .targets
                    .iter()
                    .map(|t| (t.dispenser_id.clone(), t.quantity))
                    .collect();
                (*level, per_dispenser)
            })
            .collect();
        Self { remaining }
    }

    pub fn remaining(&self, risk_level: RiskLevel, dispenser_id: &str) -> i64 {
        self.remaining
            .get(&risk_level)
            .and_then(|m| m.get(dispenser_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn category_remaining(&self, risk_level: RiskLevel) -> i64 {
        self.remaining
            .get(&risk_level)
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    /// 仅统计参与轮转的配送员的正剩余目标
    fn cyclable_remaining(&self, risk_level: RiskLevel, dispensers: &[DispenserWorkload]) -> i64 {
        dispensers
            .iter()
            .map(|w| self.remaining(risk_level, &w.dispenser_id).max(0))
            .sum()
    }

    /// 消耗目标,返回新的累加器
    pub fn consume(mut self, risk_level: RiskLevel, dispenser_id: &str, quantity: i64) -> Self {
        if let Some(v) = self
            .remaining
            .get_mut(&risk_level)
            .and_then(|m| m.get_mut(dispenser_id))
        {
            *v -= quantity;
        }
        self
    }
}

/// execute 输出: 分派请求 + 最终累加器
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub requests: Vec<AssignmentRequest>,
    pub accumulator: AllocationAccumulator,
}

impl ExecutionPlan {
    pub fn total_quantity(&self) -> i64 {
        self.requests.iter().map(|r| r.quantity).sum()
    }
}

// ==========================================
// EquitableDistributor - 公平分派引擎
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct EquitableDistributor;

impl EquitableDistributor {
    pub fn new() -> Self {
        Self
    }

    /// 阶段一: 计算分配表
    ///
    /// 库存条目需已由 RiskClassifier 标注 risk_level
    #[instrument(skip(self, items, workloads), fields(items = items.len(), dispensers = workloads.len()))]
    pub fn propose(
        &self,
        items: &[StockItem],
        workloads: &[DispenserWorkload],
    ) -> Result<AllocationTable, DistributionError> {
        if workloads.is_empty() {
            return Err(DistributionError::NoDispensersAvailable);
        }

        let mut ordered = workloads.to_vec();
        sort_least_burdened_first(&mut ordered);

        let mut buckets: BTreeMap<RiskLevel, Vec<StockItem>> = BTreeMap::new();
        let mut skipped_items = Vec::new();

        for item in items {
            let skip = |reason| SkippedItem {
                stock_item_id: item.stock_item_id.clone(),
                risk_level: item.risk_level,
                reason,
            };
            if !item.is_emergency {
                skipped_items.push(skip(SkipReason::NotEmergency));
                continue;
            }
            let Some(level) = item.risk_level else {
                skipped_items.push(skip(SkipReason::Unclassified));
                continue;
            };
            if level == RiskLevel::Expired {
                skipped_items.push(skip(SkipReason::Expired));
                continue;
            }
            if !level.is_distributable() {
                skipped_items.push(skip(SkipReason::NotDistributable));
                continue;
            }
            if item.quantity <= 0 {
                skipped_items.push(skip(SkipReason::NoQuantity));
                continue;
            }
            buckets.entry(level).or_default().push(item.clone());
        }

        let d = ordered.len() as i64;
        let mut categories = BTreeMap::new();
        for (level, items) in buckets {
            let q: i64 = items.iter().map(|i| i.quantity).sum();
            let base = q / d;
            let remainder = (q % d) as usize;

            let targets = ordered
                .iter()
                .enumerate()
                .map(|(idx, w)| DispenserTarget {
                    dispenser_id: w.dispenser_id.clone(),
                    quantity: base + if idx < remainder { 1 } else { 0 },
                })
                .collect();

            tracing::debug!(risk_level = %level, total = q, base, remainder, "类别分配完成");

            categories.insert(
                level,
                CategoryAllocation {
                    risk_level: level,
                    total_quantity: q,
                    items,
                    targets,
                },
            );
        }

        Ok(AllocationTable {
            workloads: ordered,
            categories,
            skipped_items,
        })
    }

    /// 阶段二: 按 [critical, high, low, very-low] 顺序轮转绑定到库存条目
    ///
    /// 同一类别内轮转指针跨条目延续；每个类别开始前,
    /// 以快照负荷叠加本次已绑定数量重新排序
    #[instrument(skip(self, table), fields(categories = table.categories.len()))]
    pub fn execute(&self, table: &AllocationTable) -> Result<ExecutionPlan, DistributionError> {
        if table.workloads.is_empty() {
            return Err(DistributionError::NoDispensersAvailable);
        }
        check_consistency(table)?;

        let scorer = WorkloadScorer::new();
        let mut dispensers = table.workloads.clone();
        let mut accumulator = AllocationAccumulator::from_table(table);
        let mut requests = Vec::new();

        for level in RiskLevel::DISTRIBUTION_ORDER {
            let Some(category) = table.categories.get(&level) else {
                continue;
            };

            sort_least_burdened_first(&mut dispensers);

            let (category_requests, next) =
                self.execute_category(level, &category.items, &dispensers, accumulator);
            accumulator = next;
            add_bound_quantities(&scorer, &mut dispensers, &category_requests);
            requests.extend(category_requests);
        }

        tracing::info!(requests = requests.len(), "公平分派轮转完成");
        Ok(ExecutionPlan {
            requests,
            accumulator,
        })
    }

    fn execute_category(
        &self,
        level: RiskLevel,
        items: &[StockItem],
        dispensers: &[DispenserWorkload],
        mut acc: AllocationAccumulator,
    ) -> (Vec<AssignmentRequest>, AllocationAccumulator) {
        let mut requests = Vec::new();
        let n = dispensers.len();
        let mut cursor = 0usize;

        for item in items {
            let mut item_remaining = item.quantity;

            while item_remaining > 0 && acc.cyclable_remaining(level, dispensers) > 0 {
                let dispenser_id = &dispensers[cursor].dispenser_id;
                let take = item_remaining.min(acc.remaining(level, dispenser_id));

                if take > 0 {
                    let mut request = AssignmentRequest::new(&item.stock_item_id, dispenser_id, take);
                    request.risk_level = Some(level);
                    requests.push(request);

                    acc = acc.consume(level, dispenser_id, take);
                    item_remaining -= take;
                }

                cursor = (cursor + 1) % n;
            }
        }

        (requests, acc)
    }
}

/// 分配表的目标配送员必须都在负荷快照中,且目标非负
fn check_consistency(table: &AllocationTable) -> Result<(), DistributionError> {
    let known: HashSet<&str> = table
        .workloads
        .iter()
        .map(|w| w.dispenser_id.as_str())
        .collect();

    for (level, category) in &table.categories {
        for target in &category.targets {
            if !known.contains(target.dispenser_id.as_str()) {
                return Err(DistributionError::InconsistentTable(format!(
                    "类别 {} 的目标配送员 {} 不在负荷快照中",
                    level, target.dispenser_id
                )));
            }
            if target.quantity < 0 {
                return Err(DistributionError::InconsistentTable(format!(
                    "类别 {} 的配送员 {} 目标为负数 ({})",
                    level, target.dispenser_id, target.quantity
                )));
            }
        }
    }
    Ok(())
}

/// 把本类别已绑定的数量计入负荷,供下一类别排序
fn add_bound_quantities(
    scorer: &WorkloadScorer,
    dispensers: &mut [DispenserWorkload],
    requests: &[AssignmentRequest],
) {
    for w in dispensers.iter_mut() {
        let bound: i64 = requests
            .iter()
            .filter(|r| r.dispenser_id == w.dispenser_id)
            .map(|r| r.quantity)
            .sum();
        if bound > 0 {
            w.total_quantity += bound;
            w.workload_score = scorer.score(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn workload(id: &str, score: f64) -> DispenserWorkload {
        let mut w = DispenserWorkload::empty(id);
        w.workload_score = score;
        w
    }

    fn item(id: &str, qty: i64, level: RiskLevel) -> StockItem {
        StockItem {
            stock_item_id: id.to_string(),
            product_name: id.to_string(),
            branch_id: "B1".to_string(),
            quantity: qty,
            unit_price: 1.0,
            expiry_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            is_emergency: true,
            emergency_declared_at: None,
            risk_level: Some(level),
        }
    }

    fn targets(table: &AllocationTable, level: RiskLevel) -> Vec<(String, i64)> {
        table.categories[&level]
            .targets
            .iter()
            .map(|t| (t.dispenser_id.clone(), t.quantity))
            .collect()
    }

    #[test]
    fn test_propose_even_split() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0), workload("D2", 1.0), workload("D3", 2.0)];
        let table = d
            .propose(&[item("S1", 9, RiskLevel::Critical)], &ws)
            .unwrap();
        let t: Vec<i64> = targets(&table, RiskLevel::Critical)
            .into_iter()
            .map(|(_, q)| q)
            .collect();
        assert_eq!(t, vec![3, 3, 3]);
    }

    #[test]
    fn test_propose_remainder_goes_to_least_burdened() {
        let d = EquitableDistributor::new();
        // 输入顺序打乱,D2 负荷最轻
        let ws = vec![workload("D1", 5.0), workload("D2", 0.5), workload("D3", 9.0)];
        let table = d
            .propose(&[item("S1", 10, RiskLevel::High)], &ws)
            .unwrap();
        assert_eq!(
            targets(&table, RiskLevel::High),
            vec![
                ("D2".to_string(), 4),
                ("D1".to_string(), 3),
                ("D3".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_propose_fair_share_property() {
        let d = EquitableDistributor::new();
        let ws: Vec<DispenserWorkload> = (0..4)
            .map(|i| workload(&format!("D{}", i), i as f64))
            .collect();

        for q in 0..40 {
            let table = d.propose(&[item("S1", q.max(1), RiskLevel::Low)], &ws).unwrap();
            let q = q.max(1);
            let t = targets(&table, RiskLevel::Low);
            let sum: i64 = t.iter().map(|(_, v)| v).sum();
            assert_eq!(sum, q);

            let base = q / 4;
            let extra = (q % 4) as usize;
            for (idx, (_, v)) in t.iter().enumerate() {
                assert!(*v == base || *v == base + 1);
                assert_eq!(*v == base + 1, idx < extra);
            }
        }
    }

    #[test]
    fn test_propose_skips_expired_and_middle_tiers() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0)];
        let mut not_emergency = item("S5", 3, RiskLevel::Critical);
        not_emergency.is_emergency = false;

        let items = vec![
            item("S1", 3, RiskLevel::Expired),
            item("S2", 3, RiskLevel::MediumHigh),
            item("S3", 3, RiskLevel::Medium),
            item("S4", 3, RiskLevel::VeryLow),
            not_emergency,
        ];
        let table = d.propose(&items, &ws).unwrap();

        assert_eq!(table.categories.len(), 1);
        assert!(table.categories.contains_key(&RiskLevel::VeryLow));
        let reasons: Vec<SkipReason> = table.skipped_items.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::Expired,
                SkipReason::NotDistributable,
                SkipReason::NotDistributable,
                SkipReason::NotEmergency
            ]
        );
    }

    #[test]
    fn test_no_dispensers() {
        let d = EquitableDistributor::new();
        let err = d.propose(&[item("S1", 3, RiskLevel::Critical)], &[]).unwrap_err();
        assert_eq!(err, DistributionError::NoDispensersAvailable);

        let table = AllocationTable {
            workloads: vec![],
            categories: BTreeMap::new(),
            skipped_items: vec![],
        };
        assert!(d.execute(&table).is_err());
    }

    #[test]
    fn test_execute_round_robin_binds_all_quantity() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0), workload("D2", 1.0), workload("D3", 2.0)];
        let items = vec![
            item("S1", 6, RiskLevel::Critical),
            item("S2", 4, RiskLevel::Critical),
        ];
        let table = d.propose(&items, &ws).unwrap();
        let plan = d.execute(&table).unwrap();

        let triples: Vec<(String, String, i64)> = plan
            .requests
            .iter()
            .map(|r| (r.stock_item_id.clone(), r.dispenser_id.clone(), r.quantity))
            .collect();
        assert_eq!(
            triples,
            vec![
                ("S1".to_string(), "D1".to_string(), 4),
                ("S1".to_string(), "D2".to_string(), 2),
                ("S2".to_string(), "D3".to_string(), 3),
                ("S2".to_string(), "D2".to_string(), 1),
            ]
        );
        assert_eq!(plan.total_quantity(), 10);
        assert_eq!(plan.accumulator.category_remaining(RiskLevel::Critical), 0);
        assert!(plan
            .requests
            .iter()
            .all(|r| r.risk_level == Some(RiskLevel::Critical)));
    }

    #[test]
    fn test_execute_processes_categories_in_priority_order() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0)];
        let items = vec![
            item("S-low", 2, RiskLevel::Low),
            item("S-vlow", 1, RiskLevel::VeryLow),
            item("S-crit", 1, RiskLevel::Critical),
            item("S-high", 1, RiskLevel::High),
        ];
        let table = d.propose(&items, &ws).unwrap();
        let plan = d.execute(&table).unwrap();

        let order: Vec<&str> = plan.requests.iter().map(|r| r.stock_item_id.as_str()).collect();
        assert_eq!(order, vec!["S-crit", "S-high", "S-low", "S-vlow"]);
    }

    #[test]
    fn test_execute_per_dispenser_sum_matches_target() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0), workload("D2", 3.0), workload("D3", 7.0)];
        let items = vec![
            item("S1", 5, RiskLevel::High),
            item("S2", 1, RiskLevel::High),
            item("S3", 8, RiskLevel::High),
        ];
        let table = d.propose(&items, &ws).unwrap();
        let plan = d.execute(&table).unwrap();

        for w in &ws {
            let assigned: i64 = plan
                .requests
                .iter()
                .filter(|r| r.dispenser_id == w.dispenser_id)
                .map(|r| r.quantity)
                .sum();
            assert_eq!(assigned, table.target_for(RiskLevel::High, &w.dispenser_id));
        }
        for it in &items {
            let assigned: i64 = plan
                .requests
                .iter()
                .filter(|r| r.stock_item_id == it.stock_item_id)
                .map(|r| r.quantity)
                .sum();
            assert_eq!(assigned, it.quantity);
        }
    }

    #[test]
    fn test_execute_rejects_target_outside_workloads() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0), workload("D2", 1.0)];
        let mut table = d
            .propose(&[item("S1", 3, RiskLevel::Critical)], &ws)
            .unwrap();
        // D2 在提议后被停用并移出快照
        table.workloads.retain(|w| w.dispenser_id == "D1");

        let err = d.execute(&table).unwrap_err();
        match err {
            DistributionError::InconsistentTable(msg) => assert!(msg.contains("D2")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_execute_rejects_negative_target() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0), workload("D2", 1.0)];
        let mut table = d
            .propose(&[item("S1", 3, RiskLevel::High)], &ws)
            .unwrap();
        table.categories.get_mut(&RiskLevel::High).unwrap().targets[1].quantity = -1;

        assert!(matches!(
            d.execute(&table),
            Err(DistributionError::InconsistentTable(_))
        ));
    }

    #[test]
    fn test_round_robin_stops_when_cycled_targets_exhausted() {
        let d = EquitableDistributor::new();
        let ws = vec![workload("D1", 0.0), workload("D2", 1.0)];
        let table = d
            .propose(&[item("S1", 3, RiskLevel::Critical)], &ws)
            .unwrap();
        let category = table.categories[&RiskLevel::Critical].clone();
        let acc = AllocationAccumulator::from_table(&table);
        let only_d1 = vec![workload("D1", 0.0)];

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = d.execute_category(RiskLevel::Critical, &category.items, &only_d1, acc);
            let _ = tx.send(result);
        });

        let (requests, acc) = rx
            .recv_timeout(std::time::Duration::from_secs(3))
            .expect("轮转应在目标耗尽后结束");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].dispenser_id, "D1");
        assert_eq!(requests[0].quantity, 2);
        // D2 的目标未被消耗
        assert_eq!(acc.remaining(RiskLevel::Critical, "D2"), 1);
    }

    #[test]
    fn test_later_category_reorders_by_bound_quantity() {
        let d = EquitableDistributor::new();
        // D1 快照负荷更轻,但 critical 余数使其多绑定 1 件
        let ws = vec![workload("D1", 0.0), workload("D2", 0.05)];
        let items = vec![
            item("S-crit", 3, RiskLevel::Critical),
            item("S-high", 2, RiskLevel::High),
        ];
        let table = d.propose(&items, &ws).unwrap();
        assert_eq!(table.target_for(RiskLevel::Critical, "D1"), 2);

        let plan = d.execute(&table).unwrap();
        let high: Vec<(&str, i64)> = plan
            .requests
            .iter()
            .filter(|r| r.risk_level == Some(RiskLevel::High))
            .map(|r| (r.dispenser_id.as_str(), r.quantity))
            .collect();
        // D1: 0 + 0.1·2 = 0.2 > D2: 0.05 + 0.1·1 = 0.15
        assert_eq!(high, vec![("D2", 1), ("D1", 1)]);
    }
}
