// ==========================================
// 临期库存应急调拨系统 - 分派事件发布
// ==========================================
// 职责: 定义分派事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Services 层的通知生产者实现
// 红线: 发布失败只记录日志，不回滚已落库的分派
// ==========================================

use crate::domain::assignment::AssignmentView;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 分派事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentEventType {
    /// 分派已创建
    Created,
    /// 分派已完成
    Completed,
    /// 分派已取消
    Cancelled,
    /// 截止提醒
    DeadlineReminder,
}

impl AssignmentEventType {
    pub fn as_str(&self) -> &str {
        match self {
            AssignmentEventType::Created => "Created",
            AssignmentEventType::Completed => "Completed",
            AssignmentEventType::Cancelled => "Cancelled",
            AssignmentEventType::DeadlineReminder => "DeadlineReminder",
        }
    }
}

/// 分派事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub event_type: AssignmentEventType,
    pub assignment: AssignmentView,
    /// 操作人（提醒由调度器发出时为 None）
    pub actor: Option<String>,
}

impl AssignmentEvent {
    pub fn new(event_type: AssignmentEventType, assignment: AssignmentView) -> Self {
        Self {
            event_type,
            assignment,
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn assignment_id(&self) -> &str {
        &self.assignment.assignment.assignment_id
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 分派事件发布者 Trait
///
/// # 实现说明
/// - `NotificationProducer` 实现此 trait：渲染模板并写入通知出站队列
pub trait AssignmentEventPublisher: Send + Sync {
    /// 发布分派事件
    ///
    /// # 返回
    /// - `Ok(task_id)`: 出站任务 ID（如果支持）或空字符串
    /// - `Err`: 发布失败
    fn publish(&self, event: AssignmentEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl AssignmentEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: AssignmentEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - assignment_id={}, event_type={}",
            event.assignment_id(),
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
///
/// 发布失败在此处吞掉并记录,调用方拿到的永远是成功
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn AssignmentEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn AssignmentEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 尽力发布（失败只记录 warn）
    ///
    /// # 返回
    /// - `true`: 已交给发布者
    pub fn publish_best_effort(&self, event: AssignmentEvent) -> bool {
        let Some(publisher) = &self.inner else {
            tracing::debug!(
                "OptionalEventPublisher: 未配置发布者，跳过事件 - assignment_id={}, event_type={}",
                event.assignment_id(),
                event.event_type.as_str()
            );
            return false;
        };

        let assignment_id = event.assignment_id().to_string();
        let event_type = event.event_type;
        match publisher.publish(event) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    assignment_id = %assignment_id,
                    event_type = event_type.as_str(),
                    error = %e,
                    "分派事件发布失败，已忽略"
                );
                false
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assignment::EmergencyAssignment;
    use crate::domain::types::AssignmentStatus;
    use chrono::Utc;

    struct FailingPublisher;

    impl AssignmentEventPublisher for FailingPublisher {
        fn publish(&self, _event: AssignmentEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            Err("queue unavailable".into())
        }
    }

    fn view() -> AssignmentView {
        let now = Utc::now();
        AssignmentView {
            assignment: EmergencyAssignment {
                assignment_id: "A1".to_string(),
                stock_item_id: "S1".to_string(),
                dispenser_id: "D1".to_string(),
                assigned_quantity: 1,
                deadline: now,
                status: AssignmentStatus::Pending,
                notes: None,
                assigned_at: now,
                assigned_by: "u".to_string(),
                completed_at: None,
                created_at: now,
                updated_at: now,
            },
            product_name: None,
            branch_id: None,
            expiry_date: None,
            dispenser_name: None,
            dispenser_contact: None,
        }
    }

    #[test]
    fn test_failure_is_swallowed() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(FailingPublisher));
        assert!(publisher.is_configured());
        assert!(!publisher.publish_best_effort(AssignmentEvent::new(
            AssignmentEventType::Created,
            view()
        )));
    }

    #[test]
    fn test_none_and_noop() {
        assert!(!OptionalEventPublisher::none()
            .publish_best_effort(AssignmentEvent::new(AssignmentEventType::Created, view())));

        let noop = OptionalEventPublisher::with_publisher(Arc::new(NoOpEventPublisher));
        let event = AssignmentEvent::new(AssignmentEventType::Completed, view()).with_actor("ops");
        assert_eq!(event.actor.as_deref(), Some("ops"));
        assert!(noop.publish_best_effort(event));
    }
}
