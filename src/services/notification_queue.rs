// ==========================================
// 临期库存应急调拨系统 - 通知出站队列 (Outbox)
// ==========================================
// 职责: 持久化待投递通知,支持到期出队、失败退避重试
// 红线: 入队与分派写入解耦,入队失败只记日志
// 状态: PENDING → SENDING → SENT
//                      ↘ PENDING（退避重试）→ … → FAILED
// ==========================================

use crate::domain::notification::NotificationTask;
use crate::domain::types::{NotificationStatus, NotificationType};
use crate::repository::codec::{parse_opt_ts, parse_ts, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT task_id, assignment_id, notification_type, recipient, body, metadata_json,
           status, retry_count, max_retries, next_attempt_at, created_at, sent_at, error_message
    FROM notification_queue
"#;

/// 通知出站队列
pub struct NotificationQueue {
    conn: Arc<Mutex<Connection>>,
}

impl NotificationQueue {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 提交通知任务到队列
    pub fn enqueue(&self, task: &NotificationTask) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        let metadata_json = serde_json::to_string(&task.metadata)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO notification_queue (
                task_id, assignment_id, notification_type, recipient, body, metadata_json,
                status, retry_count, max_retries, next_attempt_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                task.task_id,
                task.assignment_id,
                task.notification_type.as_str(),
                task.recipient,
                task.body,
                metadata_json,
                task.status.as_str(),
                task.retry_count,
                task.max_retries,
                ts_to_db(&task.next_attempt_at),
                ts_to_db(&task.created_at),
            ],
        )?;

        tracing::debug!(
            task_id = %task.task_id,
            assignment_id = %task.assignment_id,
            notification_type = %task.notification_type,
            "通知任务已入队"
        );

        Ok(task.task_id.clone())
    }

    /// 取出下一个到期的待投递任务,并标记为 SENDING
    pub fn dequeue_due(&self, now: DateTime<Utc>) -> RepositoryResult<Option<NotificationTask>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "{} WHERE status = 'PENDING' AND next_attempt_at <= ?1 ORDER BY next_attempt_at ASC, created_at ASC LIMIT 1",
            SELECT_COLUMNS
        );
        let task_opt = tx
            .query_row(&sql, params![ts_to_db(&now)], map_row)
            .optional()?;

        let task = match task_opt {
            Some(mut task) => {
                tx.execute(
                    "UPDATE notification_queue SET status = 'SENDING' WHERE task_id = ?1",
                    params![task.task_id],
                )?;
                task.status = NotificationStatus::Sending;
                Some(task)
            }
            None => None,
        };

        tx.commit()?;
        Ok(task)
    }

    /// 标记投递成功
    pub fn mark_sent(&self, task_id: &str, now: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE notification_queue SET status = 'SENT', sent_at = ?1, error_message = NULL WHERE task_id = ?2",
            params![ts_to_db(&now), task_id],
        )?;
        Ok(())
    }

    /// 标记投递失败
    ///
    /// # 返回
    /// - `Pending`: 未达上限,已按退避时间重新排队
    /// - `Failed`: 达到最大重试次数
    pub fn mark_failed(
        &self,
        task: &NotificationTask,
        error_message: &str,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> RepositoryResult<NotificationStatus> {
        let conn = self.get_conn()?;
        let retry_count = task.retry_count + 1;

        if retry_count < task.max_retries {
            conn.execute(
                r#"
                UPDATE notification_queue
                SET status = 'PENDING', retry_count = ?1, error_message = ?2, next_attempt_at = ?3
                WHERE task_id = ?4
                "#,
                params![retry_count, error_message, ts_to_db(&(now + backoff)), task.task_id],
            )?;

            tracing::info!(
                task_id = %task.task_id,
                retry_count,
                backoff_secs = backoff.num_seconds(),
                "通知投递失败,将退避重试"
            );
            Ok(NotificationStatus::Pending)
        } else {
            conn.execute(
                "UPDATE notification_queue SET status = 'FAILED', retry_count = ?1, error_message = ?2 WHERE task_id = ?3",
                params![retry_count, error_message, task.task_id],
            )?;

            tracing::error!(
                task_id = %task.task_id,
                retry_count,
                error = error_message,
                "通知投递失败,达到最大重试次数"
            );
            Ok(NotificationStatus::Failed)
        }
    }

    /// 将残留的 SENDING 任务恢复为 PENDING（进程异常退出后启动时调用）
    pub fn recover_in_flight(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE notification_queue SET status = 'PENDING' WHERE status = 'SENDING'",
            [],
        )?;
        if rows > 0 {
            tracing::warn!(rows, "恢复未完成的通知任务");
        }
        Ok(rows)
    }

    /// 获取任务
    pub fn get_task(&self, task_id: &str) -> RepositoryResult<Option<NotificationTask>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE task_id = ?1", SELECT_COLUMNS);
        let task = conn.query_row(&sql, params![task_id], map_row).optional()?;
        Ok(task)
    }

    /// 查询分派关联的全部通知任务
    pub fn find_by_assignment(&self, assignment_id: &str) -> RepositoryResult<Vec<NotificationTask>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE assignment_id = ?1 ORDER BY created_at ASC, rowid ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params![assignment_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// 取消任务（仅 PENDING 可取消）
    pub fn cancel_task(&self, task_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows_affected = conn.execute(
            "UPDATE notification_queue SET status = 'CANCELLED' WHERE task_id = ?1 AND status = 'PENDING'",
            params![task_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// 获取队列统计信息
    pub fn get_queue_stats(&self) -> RepositoryResult<QueueStats> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM notification_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as u32;
            match NotificationStatus::from_str(&status) {
                NotificationStatus::Pending => stats.pending_count += count,
                NotificationStatus::Sending => stats.sending_count += count,
                NotificationStatus::Sent => stats.sent_count += count,
                NotificationStatus::Failed => stats.failed_count += count,
                NotificationStatus::Cancelled => stats.cancelled_count += count,
            }
        }
        Ok(stats)
    }
}

/// 队列统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub pending_count: u32,
    pub sending_count: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub cancelled_count: u32,
}

fn map_row(row: &Row) -> rusqlite::Result<NotificationTask> {
    let type_raw: String = row.get(2)?;
    let notification_type = NotificationType::from_str(&type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("未知通知类型: {}", type_raw).into(),
        )
    })?;

    let metadata_raw: Option<String> = row.get(5)?;
    let metadata = metadata_raw
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);

    let status_raw: String = row.get(6)?;
    let next_attempt_raw: String = row.get(9)?;
    let created_raw: String = row.get(10)?;

    Ok(NotificationTask {
        task_id: row.get(0)?,
        assignment_id: row.get(1)?,
        notification_type,
        recipient: row.get(3)?,
        body: row.get(4)?,
        metadata,
        status: NotificationStatus::from_str(&status_raw),
        retry_count: row.get(7)?,
        max_retries: row.get(8)?,
        next_attempt_at: parse_ts(9, &next_attempt_raw)?,
        created_at: parse_ts(10, &created_raw)?,
        sent_at: parse_opt_ts(11, row.get(11)?)?,
        error_message: row.get(12)?,
    })
}
