// ==========================================
// 临期库存应急调拨系统 - 通知领域模型
// ==========================================
// 红线: 通知尽力而为,不得影响分派写入
// ==========================================

use crate::domain::types::{NotificationStatus, NotificationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// NotificationMessage - 已渲染的通知消息
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub notification_type: NotificationType,
    pub assignment_id: String,
    pub recipient: String, // 规范化后的收件地址（+号开头）
    pub body: String,
    pub metadata: JsonValue,
}

// ==========================================
// NotificationTask - 通知出站队列记录
// ==========================================
// 对齐: notification_queue 表
#[derive(Debug, Clone)]
pub struct NotificationTask {
    pub task_id: String,
    pub assignment_id: String,
    pub notification_type: NotificationType,
    pub recipient: String,
    pub body: String,
    pub metadata: JsonValue,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl NotificationTask {
    /// 由消息创建待投递任务
    pub fn from_message(message: NotificationMessage, max_retries: i32) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            assignment_id: message.assignment_id,
            notification_type: message.notification_type,
            recipient: message.recipient,
            body: message.body,
            metadata: message.metadata,
            status: NotificationStatus::Pending,
            retry_count: 0,
            max_retries,
            next_attempt_at: now,
            created_at: now,
            sent_at: None,
            error_message: None,
        }
    }

    /// 是否可以重试
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
