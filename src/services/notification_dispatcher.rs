// ==========================================
// 临期库存应急调拨系统 - 通知投递任务
// ==========================================
// 职责: 消费通知出站队列,调用投递通道,失败按指数退避重试
// 触发: 生产者唤醒 / 定时轮询 / 停止信号
// 红线: 投递失败只影响出站任务状态,不影响分派
// ==========================================

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::DispatchConfig;
use crate::domain::notification::NotificationTask;
use crate::domain::types::NotificationStatus;
use crate::repository::error::RepositoryResult;
use crate::services::notification_producer::NotificationError;
use crate::services::notification_queue::NotificationQueue;
use crate::services::worker::WorkerHandle;

/// 无唤醒时的轮询周期（处理退避到期的任务）
const POLL_INTERVAL_SECS: u64 = 15;

// ==========================================
// NotificationSender - 投递通道 Trait
// ==========================================

/// 短信/即时消息等投递通道
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, task: &NotificationTask) -> Result<(), NotificationError>;
}

/// 仅写日志的投递通道（未接入外部网关时使用）
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, task: &NotificationTask) -> Result<(), NotificationError> {
        tracing::info!(
            task_id = %task.task_id,
            assignment_id = %task.assignment_id,
            recipient = %task.recipient,
            notification_type = %task.notification_type,
            body = %task.body,
            "通知已投递（日志通道）"
        );
        Ok(())
    }
}

/// 一次排空的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

// ==========================================
// NotificationDispatcher - 投递任务
// ==========================================
pub struct NotificationDispatcher {
    queue: Arc<NotificationQueue>,
    sender: Arc<dyn NotificationSender>,
    config: DispatchConfig,
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<NotificationQueue>,
        sender: Arc<dyn NotificationSender>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            sender,
            config,
        }
    }

    /// 投递所有已到期的任务
    pub async fn drain(&self) -> RepositoryResult<DispatchReport> {
        let mut report = DispatchReport::default();

        while let Some(task) = self.queue.dequeue_due(Utc::now())? {
            report.attempted += 1;

            match self.sender.send(&task).await {
                Ok(()) => {
                    self.queue.mark_sent(&task.task_id, Utc::now())?;
                    report.sent += 1;
                }
                Err(e) => {
                    let backoff = self.config.backoff_for(task.retry_count);
                    match self
                        .queue
                        .mark_failed(&task, &e.to_string(), backoff, Utc::now())?
                    {
                        NotificationStatus::Failed => report.failed += 1,
                        _ => report.retried += 1,
                    }
                }
            }
        }

        if report.attempted > 0 {
            tracing::debug!(
                attempted = report.attempted,
                sent = report.sent,
                retried = report.retried,
                failed = report.failed,
                "通知队列排空完成"
            );
        }
        Ok(report)
    }

    /// 启动后台投递任务
    ///
    /// 唤醒通道关闭后退化为纯轮询,直到收到停止信号
    pub fn spawn(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<()>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(POLL_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut trigger_open = true;

            tracing::info!("通知投递任务已启动");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    msg = trigger_rx.recv(), if trigger_open => {
                        if msg.is_none() {
                            trigger_open = false;
                            tracing::debug!("投递唤醒通道已关闭,改为轮询");
                            continue;
                        }
                        self.drain_logged().await;
                    }
                    _ = ticker.tick() => {
                        self.drain_logged().await;
                    }
                }
            }
            tracing::info!("通知投递任务已退出");
        });

        WorkerHandle::new("notification_dispatcher", shutdown_tx, join)
    }

    async fn drain_logged(&self) {
        if let Err(e) = self.drain().await {
            tracing::error!(error = %e, "通知队列排空失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::NotificationMessage;
    use crate::domain::types::NotificationType;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSender {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSender for CountingSender {
        async fn send(&self, _task: &NotificationTask) -> Result<(), NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotificationError::Send("gateway timeout".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn setup_queue() -> Arc<NotificationQueue> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(NotificationQueue::new(Arc::new(Mutex::new(conn))))
    }

    fn enqueue(queue: &NotificationQueue, max_retries: i32) -> String {
        let task = NotificationTask::from_message(
            NotificationMessage {
                notification_type: NotificationType::AssignmentCreated,
                assignment_id: "A1".to_string(),
                recipient: "+254700000000".to_string(),
                body: "hello".to_string(),
                metadata: serde_json::json!({}),
            },
            max_retries,
        );
        queue.enqueue(&task).unwrap()
    }

    fn zero_backoff() -> DispatchConfig {
        DispatchConfig {
            notification_backoff_base_secs: 0,
            notification_backoff_max_secs: 0,
            ..DispatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_drain_marks_sent() {
        let queue = setup_queue();
        let id = enqueue(&queue, 3);
        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let dispatcher = NotificationDispatcher::new(queue.clone(), sender.clone(), zero_backoff());

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(queue.get_task(&id).unwrap().unwrap().status, NotificationStatus::Sent);
        assert!(dispatcher.drain().await.unwrap().attempted == 0);
    }

    #[tokio::test]
    async fn test_failures_retry_then_fail() {
        let queue = setup_queue();
        let id = enqueue(&queue, 3);
        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        // 退避为 0 时同一轮排空内即可重试到上限
        let dispatcher = NotificationDispatcher::new(queue.clone(), sender.clone(), zero_backoff());

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.retried, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);

        let task = queue.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status, NotificationStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.error_message.as_deref(), Some("投递失败: gateway timeout"));
    }

    #[tokio::test]
    async fn test_backoff_defers_retry() {
        let queue = setup_queue();
        enqueue(&queue, 3);
        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let dispatcher =
            NotificationDispatcher::new(queue.clone(), sender.clone(), DispatchConfig::default());

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(queue.get_queue_stats().unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn test_spawned_worker_delivers_on_trigger_and_stops() {
        let queue = setup_queue();
        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let dispatcher = Arc::new(NotificationDispatcher::new(
            queue.clone(),
            sender.clone(),
            zero_backoff(),
        ));
        let (tx, rx) = mpsc::channel(4);
        let handle = dispatcher.spawn(rx);

        enqueue(&queue, 3);
        tx.send(()).await.unwrap();

        for _ in 0..50 {
            if queue.get_queue_stats().unwrap().sent_count == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(queue.get_queue_stats().unwrap().sent_count, 1);

        handle.shutdown().await;
    }
}
