// ==========================================
// 临期库存应急调拨系统 - 截止提醒台账仓储
// ==========================================
// 用途: 持久化每个分派最后一次提醒时间,进程重启/多实例下冷却一致
// ==========================================

use crate::domain::reminder::ReminderLedgerEntry;
use crate::repository::codec::{parse_ts, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct ReminderLedgerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ReminderLedgerRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn get(&self, assignment_id: &str) -> RepositoryResult<Option<ReminderLedgerEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                "SELECT assignment_id, last_sent_at, reminder_count FROM reminder_ledger WHERE assignment_id = ?1",
                params![assignment_id],
                map_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// 记录一次提醒（首次插入,之后累加次数并刷新时间）
    pub fn record_sent(
        &self,
        assignment_id: &str,
        sent_at: DateTime<Utc>,
    ) -> RepositoryResult<ReminderLedgerEntry> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO reminder_ledger (assignment_id, last_sent_at, reminder_count)
            VALUES (?1, ?2, 1)
            ON CONFLICT(assignment_id) DO UPDATE SET
                last_sent_at = excluded.last_sent_at,
                reminder_count = reminder_count + 1
            "#,
            params![assignment_id, ts_to_db(&sent_at)],
        )?;

        let entry = conn.query_row(
            "SELECT assignment_id, last_sent_at, reminder_count FROM reminder_ledger WHERE assignment_id = ?1",
            params![assignment_id],
            map_row,
        )?;
        Ok(entry)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<ReminderLedgerEntry> {
    let raw: String = row.get(1)?;
    Ok(ReminderLedgerEntry {
        assignment_id: row.get(0)?,
        last_sent_at: parse_ts(1, &raw)?,
        reminder_count: row.get(2)?,
    })
}
