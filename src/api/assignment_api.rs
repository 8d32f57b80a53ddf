// ==========================================
// 临期库存应急调拨系统 - 应急分派 API
// ==========================================
// 职责: 负荷计算、公平分派（提议/执行）、人工分派、状态迁移
// 并发: 同一网点的分派周期由 BranchLockRegistry 串行化
// 红线: 校验在任何写入之前完成,失败时零写入
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::instrument;

use crate::api::error::{ApiError, ApiResult, ValidationError};
use crate::api::validator::AssignmentValidator;
use crate::domain::assignment::{AssignmentRequest, AssignmentView, EmergencyAssignment};
use crate::domain::dispenser::{Dispenser, DispenserWorkload};
use crate::domain::stock::StockItem;
use crate::domain::types::{AssignmentStatus, RiskLevel};
use crate::engine::{
    AllocationAccumulator, AllocationTable, EquitableDistributor, RiskClassifier, WorkloadScorer,
};
use crate::repository::{AssignmentRepository, DispenserRepository, StockItemRepository};
use crate::services::assignment_creator::{
    AssignmentBatchSummary, AssignmentCreator, CreationContext,
};

// ==========================================
// BranchLockRegistry - 网点级互斥
// ==========================================

/// 每个网点一把互斥锁,串行化同一网点的分派周期与人工分派
#[derive(Default)]
pub struct BranchLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BranchLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取网点锁（不存在则创建）
    pub fn lock_for(&self, branch_id: &str) -> ApiResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| ApiError::InternalError(format!("网点锁表获取失败: {}", e)))?;
        Ok(locks
            .entry(branch_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

// ==========================================
// BranchCycle - 网点分派周期快照
// ==========================================

/// 一次分派周期的输入快照与提议结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCycle {
    pub branch_id: String,
    pub today: NaiveDate,
    pub items: Vec<StockItem>, // 已标注风险等级,数量为扣除占用后的可分派量
    pub dispensers: Vec<Dispenser>,
    pub workloads: Vec<DispenserWorkload>,
    pub table: AllocationTable,
}

// ==========================================
// AssignmentApi - 应急分派 API
// ==========================================

/// 应急分派API
///
/// 职责：
/// 1. 负荷计算与公平分派提议
/// 2. 公平分派执行（校验 → 落库 → 流水 → 通知）
/// 3. 人工单品分派
/// 4. 分派状态迁移
pub struct AssignmentApi {
    stock_repo: Arc<StockItemRepository>,
    dispenser_repo: Arc<DispenserRepository>,
    assignment_repo: Arc<AssignmentRepository>,
    validator: Arc<AssignmentValidator>,
    creator: Arc<AssignmentCreator>,
    classifier: RiskClassifier,
    scorer: WorkloadScorer,
    distributor: EquitableDistributor,
    branch_locks: BranchLockRegistry,
}

impl AssignmentApi {
    pub fn new(
        stock_repo: Arc<StockItemRepository>,
        dispenser_repo: Arc<DispenserRepository>,
        assignment_repo: Arc<AssignmentRepository>,
        validator: Arc<AssignmentValidator>,
        creator: Arc<AssignmentCreator>,
    ) -> Self {
        Self {
            stock_repo,
            dispenser_repo,
            assignment_repo,
            validator,
            creator,
            classifier: RiskClassifier::new(),
            scorer: WorkloadScorer::new(),
            distributor: EquitableDistributor::new(),
            branch_locks: BranchLockRegistry::new(),
        }
    }

    /// 计算配送员负荷（负荷最轻在前）
    pub fn compute_workloads(
        &self,
        dispensers: &[Dispenser],
        history: &[EmergencyAssignment],
    ) -> Vec<DispenserWorkload> {
        self.scorer.compute(dispensers, history)
    }

    /// 公平分派提议（阶段一,无写入）
    pub fn propose_distribution(
        &self,
        items: &[StockItem],
        workloads: &[DispenserWorkload],
    ) -> ApiResult<AllocationTable> {
        Ok(self.distributor.propose(items, workloads)?)
    }

    /// 准备网点分派周期: 快照 → 风险标注 → 负荷 → 提议
    ///
    /// # 返回
    /// - Ok(BranchCycle): 提议结果与快照
    /// - Err(ApiError::Validation(NoDispensersAvailable)): 网点没有在岗配送员
    #[instrument(skip_all, fields(branch_id = %branch_id))]
    pub fn prepare_branch_cycle(&self, branch_id: &str, today: NaiveDate) -> ApiResult<BranchCycle> {
        if branch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("网点ID不能为空".to_string()));
        }

        let items = self.stock_repo.find_emergency_by_branch(branch_id)?;
        let items = self.classifier.annotate(items, today);

        let levels: Vec<(String, RiskLevel)> = items
            .iter()
            .filter_map(|i| i.risk_level.map(|level| (i.stock_item_id.clone(), level)))
            .collect();
        self.stock_repo.refresh_risk_levels(&levels)?;

        // 只对尚未被占用的数量做提议
        let mut distributable = Vec::with_capacity(items.len());
        for mut item in items {
            let held = self
                .assignment_repo
                .held_quantity_by_item(&item.stock_item_id)?;
            item.quantity = (item.quantity - held).max(0);
            distributable.push(item);
        }

        let dispensers = self.dispenser_repo.find_active_by_branch(branch_id)?;
        let history = self.assignment_repo.find_history_by_branch(branch_id)?;
        let workloads = self.compute_workloads(&dispensers, &history);
        let table = self.propose_distribution(&distributable, &workloads)?;

        tracing::info!(
            items = distributable.len(),
            dispensers = dispensers.len(),
            total_quantity = table.total_quantity(),
            skipped = table.skipped_items.len(),
            "网点分派周期已准备"
        );

        Ok(BranchCycle {
            branch_id: branch_id.to_string(),
            today,
            items: distributable,
            dispensers,
            workloads,
            table,
        })
    }

    /// 公平分派执行（阶段二）
    ///
    /// 所有条目先全部通过校验,再统一写入；任一条目校验失败则零写入
    #[instrument(skip_all, fields(acting_user = %acting_user))]
    pub fn execute_distribution(
        &self,
        table: &AllocationTable,
        deadline: Option<DateTime<Utc>>,
        acting_user: &str,
    ) -> ApiResult<AssignmentBatchSummary> {
        if acting_user.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }

        let skipped = table.skipped_items.len();
        let Some(branch_id) = table_branch(table)? else {
            tracing::info!(skipped, "分配表为空,无需执行");
            return Ok(AssignmentBatchSummary {
                skipped,
                ..AssignmentBatchSummary::default()
            });
        };

        let lock = self.branch_locks.lock_for(&branch_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| ApiError::InternalError(format!("网点锁获取失败: {}", e)))?;

        let plan = self.distributor.execute(table)?;
        let targets = AllocationAccumulator::from_table(table);

        let now = Utc::now();
        let today = now.date_naive();

        // 按库存条目分组（保持执行顺序）
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<AssignmentRequest>> = HashMap::new();
        for request in plan.requests {
            if !grouped.contains_key(&request.stock_item_id) {
                order.push(request.stock_item_id.clone());
            }
            grouped
                .entry(request.stock_item_id.clone())
                .or_default()
                .push(request);
        }

        // 以最新库存为准复核
        let mut items: HashMap<String, StockItem> = HashMap::new();
        let mut accepted: Vec<AssignmentRequest> = Vec::new();
        for stock_item_id in &order {
            let item = self
                .stock_repo
                .find_by_id(stock_item_id)?
                .ok_or_else(|| ApiError::NotFound(format!("库存条目(id={})不存在", stock_item_id)))?;
            let requests = grouped.remove(stock_item_id).unwrap_or_default();
            accepted.extend(
                self.validator
                    .validate_item_requests(&item, &requests, deadline, today)?,
            );
            items.insert(stock_item_id.clone(), item);
        }

        let deadline = deadline.ok_or(ValidationError::MissingDeadline)?;
        let dispensers = self.load_dispensers(&accepted)?;

        let mut summary = self.creator.create_batch(
            &accepted,
            &CreationContext {
                deadline,
                notes: None,
                acting_user,
                items: &items,
                dispensers: &dispensers,
                now,
                targets: Some(&targets),
            },
        );
        summary.skipped = skipped;

        if let Some(remaining) = &summary.remaining_targets {
            for (level, category) in &table.categories {
                let left = remaining.category_remaining(*level);
                if left > 0 {
                    tracing::warn!(risk_level = %level, left, total = category.total_quantity, "类别目标未全部落库");
                }
            }
        }

        tracing::info!(
            branch_id = %branch_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "公平分派执行完成"
        );
        Ok(summary)
    }

    /// 人工单品分派
    ///
    /// # 参数
    /// - stock_item_id: 库存条目ID
    /// - quantities_by_dispenser: 配送员ID → 数量（≤0 的条目被忽略）
    /// - deadline: 截止时间
    /// - notes: 备注（可选）
    /// - acting_user: 操作人
    #[instrument(skip_all, fields(stock_item_id = %stock_item_id))]
    pub fn create_manual_assignment(
        &self,
        stock_item_id: &str,
        quantities_by_dispenser: &BTreeMap<String, i64>,
        deadline: Option<DateTime<Utc>>,
        notes: Option<&str>,
        acting_user: &str,
    ) -> ApiResult<AssignmentBatchSummary> {
        if acting_user.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }

        let item = self
            .stock_repo
            .find_by_id(stock_item_id)?
            .ok_or_else(|| ApiError::NotFound(format!("库存条目(id={})不存在", stock_item_id)))?;

        let lock = self.branch_locks.lock_for(&item.branch_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| ApiError::InternalError(format!("网点锁获取失败: {}", e)))?;

        let requests: Vec<AssignmentRequest> = quantities_by_dispenser
            .iter()
            .map(|(dispenser_id, qty)| AssignmentRequest::new(stock_item_id, dispenser_id, *qty))
            .collect();

        let now = Utc::now();
        let accepted =
            self.validator
                .validate_item_requests(&item, &requests, deadline, now.date_naive())?;
        let deadline = deadline.ok_or(ValidationError::MissingDeadline)?;

        let dispensers = self.load_dispensers(&accepted)?;
        let items = HashMap::from([(item.stock_item_id.clone(), item)]);

        let summary = self.creator.create_batch(
            &accepted,
            &CreationContext {
                deadline,
                notes: notes.filter(|n| !n.trim().is_empty()),
                acting_user,
                items: &items,
                dispensers: &dispensers,
                now,
                targets: None,
            },
        );

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "人工分派完成"
        );
        Ok(summary)
    }

    /// 分派状态迁移（pending → completed / cancelled）
    pub fn update_status(
        &self,
        assignment_id: &str,
        new_status: AssignmentStatus,
        acting_user: &str,
    ) -> ApiResult<AssignmentView> {
        if assignment_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("分派ID不能为空".to_string()));
        }
        Ok(self
            .creator
            .transition_status(assignment_id, new_status, acting_user, Utc::now())?)
    }

    /// 查询网点的全部分派（含展示字段）
    pub fn list_branch_assignments(&self, branch_id: &str) -> ApiResult<Vec<AssignmentView>> {
        if branch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("网点ID不能为空".to_string()));
        }
        Ok(self.assignment_repo.find_by_branch(branch_id)?)
    }

    fn load_dispensers(
        &self,
        requests: &[AssignmentRequest],
    ) -> ApiResult<HashMap<String, Dispenser>> {
        let mut ids: Vec<String> = requests.iter().map(|r| r.dispenser_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(self
            .dispenser_repo
            .find_by_ids(&ids)?
            .into_iter()
            .map(|d| (d.dispenser_id.clone(), d))
            .collect())
    }
}

/// 分配表涉及的网点（要求唯一）
fn table_branch(table: &AllocationTable) -> ApiResult<Option<String>> {
    let mut branch: Option<&str> = None;
    for item in table.categories.values().flat_map(|c| c.items.iter()) {
        match branch {
            None => branch = Some(item.branch_id.as_str()),
            Some(b) if b != item.branch_id => {
                return Err(ApiError::InvalidInput(format!(
                    "分配表包含多个网点的库存: {} / {}",
                    b, item.branch_id
                )));
            }
            Some(_) => {}
        }
    }
    Ok(branch.map(str::to_string))
}
