use super::queries::{held_quantity, query_view};
use crate::domain::assignment::{AssignmentView, EmergencyAssignment};
use crate::domain::types::AssignmentStatus;
use crate::repository::codec::ts_to_db;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, Mutex};

// ==========================================
// AssignmentRepository - 应急分派仓储
// ==========================================
// 红线: Repository 不做分配计算,只做数据映射与不变量复核
pub struct AssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentRepository {
    /// 创建新的分派仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入单条分派,返回带展示字段的视图
    ///
    /// # 返回
    /// - `Err(OverAllocation)`: 写入后占用合计将超过库存数量
    pub fn insert(&self, assignment: &EmergencyAssignment) -> RepositoryResult<AssignmentView> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        check_capacity(&tx, assignment)?;
        insert_row(&tx, assignment)?;
        let view = query_view(&tx, &assignment.assignment_id)?.ok_or_else(|| {
            RepositoryError::InternalError(format!(
                "分派写入后无法回读: {}",
                assignment.assignment_id
            ))
        })?;

        tx.commit()?;
        Ok(view)
    }

    /// 批量插入（单事务,任一失败整体回滚）
    ///
    /// 事务内逐条复核库存不变量,同批次前序记录计入 pending 合计
    pub fn batch_insert(
        &self,
        assignments: &[EmergencyAssignment],
    ) -> RepositoryResult<Vec<AssignmentView>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for assignment in assignments {
            check_capacity(&tx, assignment)?;
            insert_row(&tx, assignment)?;
        }

        let mut views = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let view = query_view(&tx, &assignment.assignment_id)?.ok_or_else(|| {
                RepositoryError::InternalError(format!(
                    "分派写入后无法回读: {}",
                    assignment.assignment_id
                ))
            })?;
            views.push(view);
        }

        tx.commit()?;
        Ok(views)
    }

    /// 状态迁移（仅 pending → completed / cancelled）
    ///
    /// 更新语句带 `status = 'pending'` 守卫,并发迁移不会重复生效
    pub fn update_status(
        &self,
        assignment_id: &str,
        to: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<AssignmentView> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current_raw: Option<String> = tx
            .query_row(
                "SELECT status FROM emergency_assignment WHERE assignment_id = ?1",
                params![assignment_id],
                |row| row.get(0),
            )
            .optional()?;

        let current_raw = current_raw.ok_or_else(|| RepositoryError::NotFound {
            entity: "EmergencyAssignment".to_string(),
            id: assignment_id.to_string(),
        })?;

        let current = AssignmentStatus::from_str(&current_raw).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("未知状态: {}", current_raw),
            }
        })?;

        if !current.can_transition_to(to) {
            return Err(RepositoryError::InvalidStateTransition {
                from: current.to_string(),
                to: to.to_string(),
            });
        }

        let now_raw = ts_to_db(&now);
        let completed_at = match to {
            AssignmentStatus::Completed => Some(now_raw.clone()),
            _ => None,
        };

        let rows = tx.execute(
            r#"
            UPDATE emergency_assignment
            SET status = ?1, completed_at = ?2, updated_at = ?3
            WHERE assignment_id = ?4 AND status = 'pending'
            "#,
            params![to.to_db_str(), completed_at, now_raw, assignment_id],
        )?;

        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: current.to_string(),
                to: to.to_string(),
            });
        }

        let view = query_view(&tx, assignment_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "EmergencyAssignment".to_string(),
            id: assignment_id.to_string(),
        })?;

        tx.commit()?;
        Ok(view)
    }
}

/// 复核: 既有 pending 合计 + 本次数量 ≤ 库存数量
fn check_capacity(conn: &Connection, assignment: &EmergencyAssignment) -> RepositoryResult<()> {
    let quantity: Option<i64> = conn
        .query_row(
            "SELECT quantity FROM stock_item WHERE stock_item_id = ?1",
            params![assignment.stock_item_id],
            |row| row.get(0),
        )
        .optional()?;

    let quantity = quantity.ok_or_else(|| RepositoryError::NotFound {
        entity: "StockItem".to_string(),
        id: assignment.stock_item_id.clone(),
    })?;

    let available = quantity - held_quantity(conn, &assignment.stock_item_id)?;
    if assignment.assigned_quantity > available {
        return Err(RepositoryError::OverAllocation {
            stock_item_id: assignment.stock_item_id.clone(),
            requested: assignment.assigned_quantity,
            available,
        });
    }

    Ok(())
}

fn insert_row(conn: &Connection, a: &EmergencyAssignment) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO emergency_assignment (
            assignment_id, stock_item_id, dispenser_id, assigned_quantity,
            deadline, status, notes, assigned_at, assigned_by,
            completed_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            a.assignment_id,
            a.stock_item_id,
            a.dispenser_id,
            a.assigned_quantity,
            ts_to_db(&a.deadline),
            a.status.to_db_str(),
            a.notes,
            ts_to_db(&a.assigned_at),
            a.assigned_by,
            a.completed_at.as_ref().map(ts_to_db),
            ts_to_db(&a.created_at),
            ts_to_db(&a.updated_at),
        ],
    )?;
    Ok(())
}
