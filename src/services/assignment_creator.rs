// ==========================================
// 临期库存应急调拨系统 - 分派创建服务
// ==========================================
// 职责: 落库已校验的分派请求,写调拨流水,发布分派事件
// 流程: 批量事务写入 → 失败时逐条降级 → 流水 → 通知
// 红线: 流水与通知失败只记录日志,不回滚已落库的分派
// 红线: 分派只能经由本服务创建
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::assignment::{AssignmentRequest, AssignmentView, EmergencyAssignment};
use crate::domain::dispenser::Dispenser;
use crate::domain::movement::{MovementRecord, MOVEMENT_TYPE_EMERGENCY_ASSIGNMENT};
use crate::domain::stock::StockItem;
use crate::domain::types::AssignmentStatus;
use crate::engine::distributor::AllocationAccumulator;
use crate::engine::events::{AssignmentEvent, AssignmentEventType, OptionalEventPublisher};
use crate::repository::error::RepositoryResult;
use crate::repository::{AssignmentRepository, MovementRepository};

// ==========================================
// 批次结果
// ==========================================

/// 单条分派失败原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFailure {
    pub stock_item_id: String,
    pub dispenser_id: String,
    pub quantity: i64,
    pub reason: String,
}

/// 分派批次汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentBatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize, // 未参与分派的库存条目数
    pub assignments: Vec<AssignmentView>,
    pub failures: Vec<AssignmentFailure>,
    pub used_fallback: bool, // 批量事务失败后是否降级为逐条写入
    pub committed_by_dispenser: BTreeMap<String, i64>,
    /// 公平分派路径: 按已落库分派消耗后的剩余目标（未绑定 + 写入失败）
    pub remaining_targets: Option<AllocationAccumulator>,
}

impl AssignmentBatchSummary {
    pub fn total_committed(&self) -> i64 {
        self.committed_by_dispenser.values().sum()
    }
}

/// 本批次写入上下文
pub struct CreationContext<'a> {
    pub deadline: DateTime<Utc>,
    pub notes: Option<&'a str>,
    pub acting_user: &'a str,
    pub items: &'a HashMap<String, StockItem>,
    pub dispensers: &'a HashMap<String, Dispenser>,
    pub now: DateTime<Utc>,
    /// 分配目标,每落库一条即消耗；人工分派为 None
    pub targets: Option<&'a AllocationAccumulator>,
}

/// 写入过程中的已提交数量（按配送员累计）
type Committed = BTreeMap<String, i64>;

fn commit(mut committed: Committed, view: &AssignmentView) -> Committed {
    *committed
        .entry(view.assignment.dispenser_id.clone())
        .or_insert(0) += view.assignment.assigned_quantity;
    committed
}

// ==========================================
// AssignmentCreator - 分派创建服务
// ==========================================
pub struct AssignmentCreator {
    assignment_repo: Arc<AssignmentRepository>,
    movement_repo: Arc<MovementRepository>,
    publisher: OptionalEventPublisher,
}

impl AssignmentCreator {
    pub fn new(
        assignment_repo: Arc<AssignmentRepository>,
        movement_repo: Arc<MovementRepository>,
        publisher: OptionalEventPublisher,
    ) -> Self {
        Self {
            assignment_repo,
            movement_repo,
            publisher,
        }
    }

    /// 批量创建分派
    ///
    /// 先尝试单事务批量写入；失败后逐条独立写入,单条失败不影响其余条目
    #[instrument(skip_all, fields(requests = requests.len(), acting_user = ctx.acting_user))]
    pub fn create_batch(
        &self,
        requests: &[AssignmentRequest],
        ctx: &CreationContext,
    ) -> AssignmentBatchSummary {
        let mut summary = AssignmentBatchSummary::default();
        if requests.is_empty() {
            return summary;
        }

        let rows: Vec<EmergencyAssignment> = requests
            .iter()
            .map(|r| self.build_row(r, ctx))
            .collect();

        let persisted: Vec<(usize, AssignmentView)> = match self.assignment_repo.batch_insert(&rows) {
            Ok(views) => views.into_iter().enumerate().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "批量写入失败,降级为逐条写入");
                summary.used_fallback = true;

                let mut views = Vec::with_capacity(rows.len());
                for (idx, row) in rows.iter().enumerate() {
                    match self.assignment_repo.insert(row) {
                        Ok(view) => views.push((idx, view)),
                        Err(e) => {
                            tracing::warn!(
                                stock_item_id = %row.stock_item_id,
                                dispenser_id = %row.dispenser_id,
                                quantity = row.assigned_quantity,
                                error = %e,
                                "分派写入失败"
                            );
                            summary.failures.push(AssignmentFailure {
                                stock_item_id: row.stock_item_id.clone(),
                                dispenser_id: row.dispenser_id.clone(),
                                quantity: row.assigned_quantity,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                views
            }
        };

        let mut committed = Committed::new();
        let mut targets = ctx.targets.cloned();
        for (idx, view) in persisted {
            let view = merge_local_attributes(view, ctx);
            committed = commit(committed, &view);
            targets = match (targets, requests[idx].risk_level) {
                (Some(acc), Some(level)) => Some(acc.consume(
                    level,
                    &view.assignment.dispenser_id,
                    view.assignment.assigned_quantity,
                )),
                (targets, _) => targets,
            };

            self.record_movement(&view, &requests[idx], ctx);
            self.publisher.publish_best_effort(
                AssignmentEvent::new(AssignmentEventType::Created, view.clone())
                    .with_actor(ctx.acting_user),
            );
            summary.assignments.push(view);
        }

        summary.succeeded = summary.assignments.len();
        summary.failed = summary.failures.len();
        summary.committed_by_dispenser = committed;
        summary.remaining_targets = targets;

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            used_fallback = summary.used_fallback,
            "分派批次写入完成"
        );
        summary
    }

    /// 状态迁移（pending → completed / cancelled）并发布对应事件
    #[instrument(skip_all, fields(assignment_id = %assignment_id, to = %to))]
    pub fn transition_status(
        &self,
        assignment_id: &str,
        to: AssignmentStatus,
        acting_user: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<AssignmentView> {
        let view = self.assignment_repo.update_status(assignment_id, to, now)?;

        let event_type = match to {
            AssignmentStatus::Completed => Some(AssignmentEventType::Completed),
            AssignmentStatus::Cancelled => Some(AssignmentEventType::Cancelled),
            AssignmentStatus::Pending => None,
        };
        if let Some(event_type) = event_type {
            self.publisher.publish_best_effort(
                AssignmentEvent::new(event_type, view.clone()).with_actor(acting_user),
            );
        }

        tracing::info!(assignment_id, status = %view.assignment.status, "分派状态已更新");
        Ok(view)
    }

    fn build_row(&self, request: &AssignmentRequest, ctx: &CreationContext) -> EmergencyAssignment {
        EmergencyAssignment {
            assignment_id: Uuid::new_v4().to_string(),
            stock_item_id: request.stock_item_id.clone(),
            dispenser_id: request.dispenser_id.clone(),
            assigned_quantity: request.quantity,
            deadline: ctx.deadline,
            status: AssignmentStatus::Pending,
            notes: ctx.notes.map(str::to_string),
            assigned_at: ctx.now,
            assigned_by: ctx.acting_user.to_string(),
            completed_at: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        }
    }

    /// 写调拨流水（失败只记录日志）
    fn record_movement(&self, view: &AssignmentView, request: &AssignmentRequest, ctx: &CreationContext) {
        let a = &view.assignment;
        let Some(from_branch_id) = view.branch_id.clone() else {
            tracing::warn!(assignment_id = %a.assignment_id, "缺少库存网点信息,跳过调拨流水");
            return;
        };

        let note = request
            .risk_level
            .map(|level| format!("risk_level={}", level))
            .or_else(|| a.notes.clone());

        let record = MovementRecord {
            movement_id: Uuid::new_v4().to_string(),
            stock_item_id: a.stock_item_id.clone(),
            from_branch_id,
            dispenser_id: Some(a.dispenser_id.clone()),
            quantity_moved: a.assigned_quantity,
            movement_type: MOVEMENT_TYPE_EMERGENCY_ASSIGNMENT.to_string(),
            reference_id: Some(a.assignment_id.clone()),
            moved_by: ctx.acting_user.to_string(),
            moved_at: ctx.now,
            notes: note,
        };

        if let Err(e) = self.movement_repo.insert(&record) {
            tracing::warn!(assignment_id = %a.assignment_id, error = %e, "调拨流水写入失败,已忽略");
        }
    }
}

/// JOIN 缺失的展示字段用本地已知信息补齐
fn merge_local_attributes(mut view: AssignmentView, ctx: &CreationContext) -> AssignmentView {
    if let Some(d) = ctx.dispensers.get(&view.assignment.dispenser_id) {
        if view.dispenser_name.is_none() {
            view.dispenser_name = Some(d.name.clone());
        }
        if view.dispenser_contact.is_none() {
            view.dispenser_contact = d.contact.clone();
        }
    }
    if let Some(item) = ctx.items.get(&view.assignment.stock_item_id) {
        if view.product_name.is_none() {
            view.product_name = Some(item.product_name.clone());
        }
        if view.branch_id.is_none() {
            view.branch_id = Some(item.branch_id.clone());
        }
        if view.expiry_date.is_none() {
            view.expiry_date = Some(item.expiry_date);
        }
    }
    view
}
