// ==========================================
// 临期库存应急调拨系统 - 服务层
// ==========================================
// 职责: 分派落库、通知出站队列、投递任务、截止提醒调度
// 依赖: Repository 层 + Engine 层事件 trait
// ==========================================

pub mod assignment_creator;
pub mod notification_dispatcher;
pub mod notification_producer;
pub mod notification_queue;
pub mod reminder_scheduler;
pub mod worker;

pub use assignment_creator::{
    AssignmentBatchSummary, AssignmentCreator, AssignmentFailure, CreationContext,
};
pub use notification_dispatcher::{
    DispatchReport, LogNotificationSender, NotificationDispatcher, NotificationSender,
};
pub use notification_producer::{normalize_recipient, NotificationError, NotificationProducer};
pub use notification_queue::{NotificationQueue, QueueStats};
pub use reminder_scheduler::{DeadlineReminderScheduler, ReminderTickReport};
pub use worker::WorkerHandle;
