// ==========================================
// 临期库存应急调拨系统 - 分派校验器
// ==========================================
// 职责: 公平分派与人工分派共用的写入前校验
// 顺序: 过期 → 超额 → 跨网点 → 无有效数量 → 缺截止时间
// 红线: 任一失败即中止,不产生任何写入
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::error::{ApiResult, ValidationError};
use crate::domain::assignment::AssignmentRequest;
use crate::domain::dispenser::Dispenser;
use crate::domain::stock::StockItem;
use crate::repository::{AssignmentRepository, DispenserRepository};

// ==========================================
// ValidationInput - 单个库存条目的校验输入
// ==========================================
pub struct ValidationInput<'a> {
    pub item: &'a StockItem,
    pub held_quantity: i64, // 已占用数量（pending + 库存未同步的已完成分派）
    pub requests: &'a [AssignmentRequest],
    pub dispensers: &'a HashMap<String, Dispenser>,
    pub deadline: Option<DateTime<Utc>>,
    pub today: NaiveDate,
}

// ==========================================
// AssignmentValidator - 分派校验器
// ==========================================
pub struct AssignmentValidator {
    assignment_repo: Arc<AssignmentRepository>,
    dispenser_repo: Arc<DispenserRepository>,
}

impl AssignmentValidator {
    pub fn new(
        assignment_repo: Arc<AssignmentRepository>,
        dispenser_repo: Arc<DispenserRepository>,
    ) -> Self {
        Self {
            assignment_repo,
            dispenser_repo,
        }
    }

    /// 校验单个库存条目的分派请求（读取占用数量与配送员信息）
    ///
    /// # 返回
    /// - Ok(requests): 已剔除 ≤0 数量后的有效请求
    pub fn validate_item_requests(
        &self,
        item: &StockItem,
        requests: &[AssignmentRequest],
        deadline: Option<DateTime<Utc>>,
        today: NaiveDate,
    ) -> ApiResult<Vec<AssignmentRequest>> {
        let held_quantity = self
            .assignment_repo
            .held_quantity_by_item(&item.stock_item_id)?;

        let mut ids: Vec<String> = requests.iter().map(|r| r.dispenser_id.clone()).collect();
        ids.sort();
        ids.dedup();
        let dispensers: HashMap<String, Dispenser> = self
            .dispenser_repo
            .find_by_ids(&ids)?
            .into_iter()
            .map(|d| (d.dispenser_id.clone(), d))
            .collect();

        let accepted = Self::check(&ValidationInput {
            item,
            held_quantity,
            requests,
            dispensers: &dispensers,
            deadline,
            today,
        })?;
        Ok(accepted)
    }

    /// 纯校验逻辑（无 I/O）
    pub fn check(input: &ValidationInput) -> Result<Vec<AssignmentRequest>, ValidationError> {
        let item = input.item;

        // 1. 过期
        if item.is_expired(input.today) {
            return Err(ValidationError::ExpiredItem {
                stock_item_id: item.stock_item_id.clone(),
                expiry_date: item.expiry_date,
            });
        }

        let positive: Vec<&AssignmentRequest> =
            input.requests.iter().filter(|r| r.quantity > 0).collect();

        // 2. 超额
        let requested: i64 = positive.iter().map(|r| r.quantity).sum();
        let available = (item.quantity - input.held_quantity).max(0);
        if requested > available {
            return Err(ValidationError::OverAssignment {
                stock_item_id: item.stock_item_id.clone(),
                requested,
                available,
            });
        }

        // 3. 跨网点（未知配送员同样视为不匹配）
        let mut offenders: Vec<String> = positive
            .iter()
            .filter(|r| r.stock_item_id != item.stock_item_id
                || input
                    .dispensers
                    .get(&r.dispenser_id)
                    .map(|d| d.branch_id != item.branch_id)
                    .unwrap_or(true))
            .map(|r| r.dispenser_id.clone())
            .collect();
        offenders.sort();
        offenders.dedup();
        if !offenders.is_empty() {
            return Err(ValidationError::BranchMismatch {
                stock_item_id: item.stock_item_id.clone(),
                branch_id: item.branch_id.clone(),
                dispensers: offenders,
            });
        }

        // 4. 无有效数量
        if positive.is_empty() {
            return Err(ValidationError::NoAssignments {
                stock_item_id: item.stock_item_id.clone(),
            });
        }

        // 5. 截止时间
        if input.deadline.is_none() {
            return Err(ValidationError::MissingDeadline);
        }

        Ok(positive.into_iter().cloned().collect())
    }
}
