// ==========================================
// 临期库存应急调拨系统 - 配送员数据仓储
// ==========================================
// 红线: 配送员数据对本系统只读（upsert 仅供外部同步/测试落库）
// ==========================================

use crate::domain::dispenser::Dispenser;
use crate::domain::types::DispenserStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

pub struct DispenserRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DispenserRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, dispenser: &Dispenser) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO dispenser (dispenser_id, name, branch_id, contact, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(dispenser_id) DO UPDATE SET
                name = excluded.name,
                branch_id = excluded.branch_id,
                contact = excluded.contact,
                status = excluded.status
            "#,
            params![
                dispenser.dispenser_id,
                dispenser.name,
                dispenser.branch_id,
                dispenser.contact,
                dispenser.status.to_db_str(),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, dispenser_id: &str) -> RepositoryResult<Option<Dispenser>> {
        let conn = self.get_conn()?;
        let dispenser = conn
            .query_row(
                "SELECT dispenser_id, name, branch_id, contact, status FROM dispenser WHERE dispenser_id = ?1",
                params![dispenser_id],
                map_row,
            )
            .optional()?;
        Ok(dispenser)
    }

    /// 按 ID 列表查询（未找到的 ID 直接忽略，由调用方比对）
    pub fn find_by_ids(&self, dispenser_ids: &[String]) -> RepositoryResult<Vec<Dispenser>> {
        let mut result = Vec::with_capacity(dispenser_ids.len());
        for id in dispenser_ids {
            if let Some(d) = self.find_by_id(id)? {
                result.push(d);
            }
        }
        Ok(result)
    }

    /// 查询网点内在岗配送员（公平分派的 D 仅计在岗人员）
    pub fn find_active_by_branch(&self, branch_id: &str) -> RepositoryResult<Vec<Dispenser>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT dispenser_id, name, branch_id, contact, status
            FROM dispenser
            WHERE branch_id = ?1 AND status = 'active'
            ORDER BY dispenser_id ASC
            "#,
        )?;
        let list = stmt
            .query_map(params![branch_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(list)
    }
}

fn map_row(row: &Row) -> SqliteResult<Dispenser> {
    let status_raw: String = row.get(4)?;
    Ok(Dispenser {
        dispenser_id: row.get(0)?,
        name: row.get(1)?,
        branch_id: row.get(2)?,
        contact: row.get(3)?,
        status: DispenserStatus::from_str(&status_raw),
    })
}
