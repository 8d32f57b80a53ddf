use super::core::AssignmentRepository;
use crate::domain::assignment::{AssignmentView, EmergencyAssignment};
use crate::domain::types::AssignmentStatus;
use crate::repository::codec::{parse_date, parse_opt_ts, parse_ts};
use crate::repository::error::RepositoryResult;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};

const VIEW_SELECT: &str = r#"
    SELECT a.assignment_id, a.stock_item_id, a.dispenser_id, a.assigned_quantity,
           a.deadline, a.status, a.notes, a.assigned_at, a.assigned_by,
           a.completed_at, a.created_at, a.updated_at,
           s.product_name, s.branch_id, s.expiry_date,
           d.name, d.contact
    FROM emergency_assignment a
    LEFT JOIN stock_item s ON s.stock_item_id = a.stock_item_id
    LEFT JOIN dispenser d ON d.dispenser_id = a.dispenser_id
"#;

impl AssignmentRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 ID 查询分派视图
    pub fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<AssignmentView>> {
        let conn = self.get_conn()?;
        Ok(query_view(&conn, assignment_id)?)
    }

    /// 查询网点内全部分派（按库存条目所属网点）
    pub fn find_by_branch(&self, branch_id: &str) -> RepositoryResult<Vec<AssignmentView>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE s.branch_id = ?1 ORDER BY a.assigned_at DESC, a.assignment_id ASC",
            VIEW_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let views = stmt
            .query_map(params![branch_id], map_view_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(views)
    }

    /// 查询全部 pending 分派（截止提醒使用,按截止时间升序）
    pub fn find_pending(&self) -> RepositoryResult<Vec<AssignmentView>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE a.status = 'pending' ORDER BY a.deadline ASC, a.assignment_id ASC",
            VIEW_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let views = stmt
            .query_map([], map_view_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(views)
    }

    /// 查询网点配送员的分派历史（不含已取消,用于负荷评分）
    pub fn find_history_by_branch(
        &self,
        branch_id: &str,
    ) -> RepositoryResult<Vec<EmergencyAssignment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT a.assignment_id, a.stock_item_id, a.dispenser_id, a.assigned_quantity,
                   a.deadline, a.status, a.notes, a.assigned_at, a.assigned_by,
                   a.completed_at, a.created_at, a.updated_at
            FROM emergency_assignment a
            JOIN dispenser d ON d.dispenser_id = a.dispenser_id
            WHERE d.branch_id = ?1 AND a.status != 'cancelled'
            ORDER BY a.assigned_at ASC
            "#,
        )?;
        let list = stmt
            .query_map(params![branch_id], map_assignment_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(list)
    }

    /// 库存条目当前占用数量（pending + 库存未同步前完成的分派）
    pub fn held_quantity_by_item(&self, stock_item_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Ok(held_quantity(&conn, stock_item_id)?)
    }

    /// 库存条目当前 pending 分派数量合计
    pub fn pending_quantity_by_item(&self, stock_item_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let total: i64 = conn.query_row(
            r#"
            SELECT COALESCE(SUM(assigned_quantity), 0)
            FROM emergency_assignment
            WHERE stock_item_id = ?1 AND status = 'pending'
            "#,
            params![stock_item_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// 统计库存条目的分派记录数（任意状态）
    pub fn count_by_item(&self, stock_item_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emergency_assignment WHERE stock_item_id = ?1",
            params![stock_item_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

/// 占用数量: pending 分派,以及完成时间不早于最近一次库存数量同步的已完成分派
///
/// 外部同步库存数量后,之前完成的分派视为已从 quantity 中扣除
pub(super) fn held_quantity(conn: &Connection, stock_item_id: &str) -> SqliteResult<i64> {
    conn.query_row(
        r#"
        SELECT COALESCE(SUM(a.assigned_quantity), 0)
        FROM emergency_assignment a
        JOIN stock_item s ON s.stock_item_id = a.stock_item_id
        WHERE a.stock_item_id = ?1
          AND (
            a.status = 'pending'
            OR (a.status = 'completed'
                AND a.completed_at >= COALESCE(s.quantity_synced_at, ''))
          )
        "#,
        params![stock_item_id],
        |row| row.get(0),
    )
}

pub(super) fn query_view(
    conn: &Connection,
    assignment_id: &str,
) -> rusqlite::Result<Option<AssignmentView>> {
    let sql = format!("{} WHERE a.assignment_id = ?1", VIEW_SELECT);
    conn.query_row(&sql, params![assignment_id], map_view_row)
        .optional()
}

fn map_assignment_row(row: &Row) -> SqliteResult<EmergencyAssignment> {
    let deadline_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let assigned_at_raw: String = row.get(7)?;
    let created_at_raw: String = row.get(10)?;
    let updated_at_raw: String = row.get(11)?;

    let status = AssignmentStatus::from_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("未知分派状态: {}", status_raw).into(),
        )
    })?;

    Ok(EmergencyAssignment {
        assignment_id: row.get(0)?,
        stock_item_id: row.get(1)?,
        dispenser_id: row.get(2)?,
        assigned_quantity: row.get(3)?,
        deadline: parse_ts(4, &deadline_raw)?,
        status,
        notes: row.get(6)?,
        assigned_at: parse_ts(7, &assigned_at_raw)?,
        assigned_by: row.get(8)?,
        completed_at: parse_opt_ts(9, row.get(9)?)?,
        created_at: parse_ts(10, &created_at_raw)?,
        updated_at: parse_ts(11, &updated_at_raw)?,
    })
}

fn map_view_row(row: &Row) -> SqliteResult<AssignmentView> {
    let assignment = map_assignment_row(row)?;
    let expiry_raw: Option<String> = row.get(14)?;

    Ok(AssignmentView {
        assignment,
        product_name: row.get(12)?,
        branch_id: row.get(13)?,
        expiry_date: expiry_raw.map(|s| parse_date(14, &s)).transpose()?,
        dispenser_name: row.get(15)?,
        dispenser_contact: row.get(16)?,
    })
}
