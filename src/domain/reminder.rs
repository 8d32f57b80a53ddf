// ==========================================
// 临期库存应急调拨系统 - 提醒台账领域模型
// ==========================================
// 用途: 记录每个分派最后一次截止提醒时间,跨进程重启保持冷却
// 对齐: reminder_ledger 表
// ==========================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderLedgerEntry {
    pub assignment_id: String,
    pub last_sent_at: DateTime<Utc>,
    pub reminder_count: i32,
}

impl ReminderLedgerEntry {
    /// 距上次提醒是否已超过冷却时间
    pub fn cooled_down(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        now - self.last_sent_at >= cooldown
    }
}
