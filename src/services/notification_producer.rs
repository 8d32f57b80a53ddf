// ==========================================
// 临期库存应急调拨系统 - 通知生产者
// ==========================================
// 职责: 实现 Engine 层定义的 AssignmentEventPublisher trait
// 流程: 渲染模板 → 规范化收件地址 → 写入出站队列 → 唤醒投递任务
// 红线: 通知尽力而为；唤醒失败只记录日志,从不回滚分派
// ==========================================

use crate::config::DispatchConfig;
use crate::domain::assignment::AssignmentView;
use crate::domain::notification::{NotificationMessage, NotificationTask};
use crate::domain::types::NotificationType;
use crate::engine::events::{AssignmentEvent, AssignmentEventPublisher, AssignmentEventType};
use crate::i18n;
use crate::repository::codec::ts_to_db;
use crate::repository::error::RepositoryError;
use crate::services::notification_queue::NotificationQueue;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const FALLBACK_LOCALE: &str = "zh-CN";
const DEADLINE_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// 通知错误（始终在发布边界被捕获并记录）
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("收件地址缺失: assignment_id={0}")]
    MissingRecipient(String),

    #[error("收件地址无效: {0}")]
    InvalidRecipient(String),

    #[error("通知入队失败: {0}")]
    Enqueue(#[from] RepositoryError),

    #[error("投递失败: {0}")]
    Send(String),
}

impl From<AssignmentEventType> for NotificationType {
    fn from(event_type: AssignmentEventType) -> Self {
        match event_type {
            AssignmentEventType::Created => NotificationType::AssignmentCreated,
            AssignmentEventType::Completed => NotificationType::AssignmentCompleted,
            AssignmentEventType::Cancelled => NotificationType::AssignmentCancelled,
            AssignmentEventType::DeadlineReminder => NotificationType::DeadlineReminder,
        }
    }
}

/// 规范化收件地址为 `+` 开头的国际格式（尽力而为）
///
/// - 含 `@` 的地址原样返回
/// - 去除空格、横线、括号等分隔符
/// - `00` 前缀 → `+`
/// - 单个国内长途前缀 `0` + 默认国家码 → `+<国家码>`
/// - 其他情况直接补 `+`
pub fn normalize_recipient(raw: &str, default_country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('@') {
        return Some(trimmed.to_string());
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if trimmed.starts_with('+') {
        return Some(format!("+{}", digits));
    }
    if let Some(rest) = digits.strip_prefix("00") {
        if !rest.is_empty() {
            return Some(format!("+{}", rest));
        }
    }
    let cc = default_country_code.trim().trim_start_matches('+');
    if let Some(rest) = digits.strip_prefix('0') {
        if !cc.is_empty() && !rest.is_empty() {
            return Some(format!("+{}{}", cc, rest));
        }
    }
    Some(format!("+{}", digits))
}

// ==========================================
// NotificationProducer - 通知生产者
// ==========================================
pub struct NotificationProducer {
    queue: Arc<NotificationQueue>,
    trigger: Option<mpsc::Sender<()>>,
    locale: String,
    default_country_code: String,
    max_retries: i32,
}

impl NotificationProducer {
    pub fn new(queue: Arc<NotificationQueue>, config: &DispatchConfig) -> Self {
        let locale = if i18n::is_supported_locale(&config.locale) {
            config.locale.clone()
        } else {
            tracing::warn!(locale = %config.locale, "不支持的通知语言,回退到 {}", FALLBACK_LOCALE);
            FALLBACK_LOCALE.to_string()
        };

        Self {
            queue,
            trigger: None,
            locale,
            default_country_code: config.default_country_code.clone(),
            max_retries: config.notification_max_retries,
        }
    }

    /// 绑定投递任务的唤醒通道
    pub fn with_trigger(mut self, trigger: mpsc::Sender<()>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// 渲染通知消息
    pub fn render(
        &self,
        notification_type: NotificationType,
        view: &AssignmentView,
    ) -> Result<NotificationMessage, NotificationError> {
        let a = &view.assignment;

        let raw_contact = view
            .dispenser_contact
            .as_deref()
            .ok_or_else(|| NotificationError::MissingRecipient(a.assignment_id.clone()))?;
        let recipient = normalize_recipient(raw_contact, &self.default_country_code)
            .ok_or_else(|| NotificationError::InvalidRecipient(raw_contact.to_string()))?;

        let quantity = a.assigned_quantity.to_string();
        let deadline = a.deadline.format(DEADLINE_DISPLAY_FORMAT).to_string();
        let none_text = i18n::t_in_locale(&self.locale, "common.none", &[]);
        let notes = a.notes.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(none_text.as_str());

        let body = i18n::t_in_locale(
            &self.locale,
            notification_type.template_key(),
            &[
                ("dispenser", view.dispenser_name.as_deref().unwrap_or(a.dispenser_id.as_str())),
                ("product", view.product_name.as_deref().unwrap_or(a.stock_item_id.as_str())),
                ("quantity", quantity.as_str()),
                ("branch", view.branch_id.as_deref().unwrap_or("-")),
                ("deadline", deadline.as_str()),
                ("notes", notes),
            ],
        );

        Ok(NotificationMessage {
            notification_type,
            assignment_id: a.assignment_id.clone(),
            recipient,
            body,
            metadata: json!({
                "assignment_id": a.assignment_id,
                "stock_item_id": a.stock_item_id,
                "dispenser_id": a.dispenser_id,
                "branch_id": view.branch_id,
                "quantity": a.assigned_quantity,
                "deadline": ts_to_db(&a.deadline),
                "status": a.status.to_db_str(),
                "locale": self.locale,
            }),
        })
    }

    /// 渲染并写入出站队列,随后唤醒投递任务
    pub fn produce(
        &self,
        notification_type: NotificationType,
        view: &AssignmentView,
    ) -> Result<String, NotificationError> {
        let message = self.render(notification_type, view)?;
        let task = NotificationTask::from_message(message, self.max_retries);
        let task_id = self.queue.enqueue(&task)?;

        self.trigger_dispatch(&task_id);
        Ok(task_id)
    }

    /// 唤醒投递任务（失败只记录日志）
    fn trigger_dispatch(&self, task_id: &str) {
        let Some(trigger) = &self.trigger else {
            tracing::debug!(task_id, "未绑定投递任务,通知将由轮询投递");
            return;
        };

        match trigger.try_send(()) {
            Ok(()) => {}
            // 通道已满说明已有待处理的唤醒,本次可合并
            Err(TrySendError::Full(())) => {
                tracing::debug!(task_id, "投递唤醒通道已满,合并唤醒");
            }
            Err(TrySendError::Closed(())) => {
                tracing::warn!(task_id, "投递任务已停止,通知留在队列中等待下次启动");
            }
        }
    }
}

impl AssignmentEventPublisher for NotificationProducer {
    fn publish(&self, event: AssignmentEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let notification_type = NotificationType::from(event.event_type);
        match self.produce(notification_type, &event.assignment) {
            Ok(task_id) => {
                tracing::info!(
                    task_id = %task_id,
                    assignment_id = %event.assignment_id(),
                    notification_type = %notification_type,
                    "通知已入队"
                );
                Ok(task_id)
            }
            Err(e) => Err(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assignment::EmergencyAssignment;
    use crate::domain::types::AssignmentStatus;
    use chrono::{Duration, TimeZone, Utc};
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn setup_queue() -> Arc<NotificationQueue> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(NotificationQueue::new(Arc::new(Mutex::new(conn))))
    }

    fn view(contact: Option<&str>) -> AssignmentView {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        AssignmentView {
            assignment: EmergencyAssignment {
                assignment_id: "A1".to_string(),
                stock_item_id: "S1".to_string(),
                dispenser_id: "D1".to_string(),
                assigned_quantity: 12,
                deadline: at + Duration::hours(30),
                status: AssignmentStatus::Pending,
                notes: Some("冷藏".to_string()),
                assigned_at: at,
                assigned_by: "ops".to_string(),
                completed_at: None,
                created_at: at,
                updated_at: at,
            },
            product_name: Some("Amoxicillin".to_string()),
            branch_id: Some("B01".to_string()),
            expiry_date: None,
            dispenser_name: Some("Amina".to_string()),
            dispenser_contact: contact.map(str::to_string),
        }
    }

    fn config(locale: &str, cc: &str) -> DispatchConfig {
        DispatchConfig {
            locale: locale.to_string(),
            default_country_code: cc.to_string(),
            ..DispatchConfig::default()
        }
    }

    #[test]
    fn test_normalize_recipient() {
        assert_eq!(normalize_recipient("+254 712-345-678", ""), Some("+254712345678".to_string()));
        assert_eq!(normalize_recipient("00254712345678", ""), Some("+254712345678".to_string()));
        assert_eq!(normalize_recipient("0712 345 678", "254"), Some("+254712345678".to_string()));
        assert_eq!(normalize_recipient("0712345678", "+254"), Some("+254712345678".to_string()));
        assert_eq!(normalize_recipient("(0712) 345678", ""), Some("+0712345678".to_string()));
        assert_eq!(normalize_recipient("254712345678", "254"), Some("+254712345678".to_string()));
        assert_eq!(normalize_recipient("ops@example.com", ""), Some("ops@example.com".to_string()));
        assert_eq!(normalize_recipient("  ", ""), None);
        assert_eq!(normalize_recipient("n/a", ""), None);
    }

    #[test]
    fn test_render_substitutes_fields() {
        let producer = NotificationProducer::new(setup_queue(), &config("en", "254"));
        let msg = producer
            .render(NotificationType::AssignmentCreated, &view(Some("0712345678")))
            .unwrap();

        assert_eq!(msg.recipient, "+254712345678");
        assert!(msg.body.contains("Amina"));
        assert!(msg.body.contains("12 x Amoxicillin"));
        assert!(msg.body.contains("B01"));
        assert!(msg.body.contains("2026-03-02 14:00 UTC"));
        assert!(!msg.body.contains("%{"));
        assert_eq!(msg.metadata["quantity"], 12);
        assert_eq!(msg.metadata["branch_id"], "B01");
    }

    #[test]
    fn test_unsupported_locale_falls_back() {
        let producer = NotificationProducer::new(setup_queue(), &config("fr", ""));
        let msg = producer
            .render(NotificationType::DeadlineReminder, &view(Some("+254712345678")))
            .unwrap();
        assert!(msg.body.contains("Amoxicillin"));
        assert!(!msg.body.contains("%{"));
    }

    #[test]
    fn test_missing_contact_is_error() {
        let producer = NotificationProducer::new(setup_queue(), &DispatchConfig::default());
        let err = producer
            .render(NotificationType::AssignmentCreated, &view(None))
            .unwrap_err();
        assert!(matches!(err, NotificationError::MissingRecipient(_)));
    }

    #[test]
    fn test_produce_enqueues_and_survives_closed_trigger() {
        let queue = setup_queue();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let producer = NotificationProducer::new(queue.clone(), &DispatchConfig::default())
            .with_trigger(tx);
        let task_id = producer
            .produce(NotificationType::AssignmentCompleted, &view(Some("+254712345678")))
            .unwrap();

        let task = queue.get_task(&task_id).unwrap().unwrap();
        assert_eq!(task.notification_type, NotificationType::AssignmentCompleted);
        assert_eq!(task.max_retries, 3);
        assert_eq!(queue.get_queue_stats().unwrap().pending_count, 1);
    }

    #[test]
    fn test_full_trigger_channel_is_coalesced() {
        let queue = setup_queue();
        let (tx, mut rx) = mpsc::channel(1);
        let producer = NotificationProducer::new(queue.clone(), &DispatchConfig::default())
            .with_trigger(tx);

        for _ in 0..3 {
            producer
                .produce(NotificationType::AssignmentCreated, &view(Some("+254712345678")))
                .unwrap();
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.get_queue_stats().unwrap().pending_count, 3);
    }
}
