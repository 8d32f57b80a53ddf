// ==========================================
// 临期库存应急调拨系统 - 调拨流水数据仓储
// ==========================================
// 红线: 流水只追加,不提供更新/删除
// ==========================================

use crate::domain::movement::MovementRecord;
use crate::repository::codec::{parse_ts, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

pub struct MovementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MovementRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加流水记录
    pub fn insert(&self, record: &MovementRecord) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO movement_history (
                movement_id, stock_item_id, from_branch_id, dispenser_id,
                quantity_moved, movement_type, reference_id, moved_by, moved_at, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.movement_id,
                record.stock_item_id,
                record.from_branch_id,
                record.dispenser_id,
                record.quantity_moved,
                record.movement_type,
                record.reference_id,
                record.moved_by,
                ts_to_db(&record.moved_at),
                record.notes,
            ],
        )?;

        Ok(record.movement_id.clone())
    }

    /// 查询库存条目的流水（时间倒序）
    pub fn find_by_stock_item(&self, stock_item_id: &str) -> RepositoryResult<Vec<MovementRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT movement_id, stock_item_id, from_branch_id, dispenser_id,
                   quantity_moved, movement_type, reference_id, moved_by, moved_at, notes
            FROM movement_history
            WHERE stock_item_id = ?1
            ORDER BY moved_at DESC
            "#,
        )?;
        let records = stmt
            .query_map(params![stock_item_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 查询关联分派的流水
    pub fn find_by_reference(&self, reference_id: &str) -> RepositoryResult<Vec<MovementRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT movement_id, stock_item_id, from_branch_id, dispenser_id,
                   quantity_moved, movement_type, reference_id, moved_by, moved_at, notes
            FROM movement_history
            WHERE reference_id = ?1
            ORDER BY moved_at ASC
            "#,
        )?;
        let records = stmt
            .query_map(params![reference_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }
}

fn map_row(row: &Row) -> SqliteResult<MovementRecord> {
    let moved_at_raw: String = row.get(8)?;
    Ok(MovementRecord {
        movement_id: row.get(0)?,
        stock_item_id: row.get(1)?,
        from_branch_id: row.get(2)?,
        dispenser_id: row.get(3)?,
        quantity_moved: row.get(4)?,
        movement_type: row.get(5)?,
        reference_id: row.get(6)?,
        moved_by: row.get(7)?,
        moved_at: parse_ts(8, &moved_at_raw)?,
        notes: row.get(9)?,
    })
}
