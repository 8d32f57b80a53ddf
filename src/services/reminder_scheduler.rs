// ==========================================
// 临期库存应急调拨系统 - 截止提醒调度
// ==========================================
// 职责: 周期扫描 pending 分派,在截止窗口内发出提醒
// 冷却: 每个分派的最后提醒时间落库（reminder_ledger）,重启后依然生效
// 红线: 对分派只读,唯一写入是提醒台账
// ==========================================

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::instrument;

use crate::config::DispatchConfig;
use crate::engine::events::{AssignmentEvent, AssignmentEventPublisher, AssignmentEventType};
use crate::repository::error::RepositoryResult;
use crate::repository::{AssignmentRepository, ReminderLedgerRepository};
use crate::services::worker::WorkerHandle;

/// 单轮扫描统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderTickReport {
    pub checked: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ==========================================
// DeadlineReminderScheduler - 截止提醒调度器
// ==========================================
pub struct DeadlineReminderScheduler {
    assignment_repo: Arc<AssignmentRepository>,
    ledger_repo: Arc<ReminderLedgerRepository>,
    publisher: Arc<dyn AssignmentEventPublisher>,
    window: Duration,
    cooldown: Duration,
    period: std::time::Duration,
}

impl DeadlineReminderScheduler {
    pub fn new(
        assignment_repo: Arc<AssignmentRepository>,
        ledger_repo: Arc<ReminderLedgerRepository>,
        publisher: Arc<dyn AssignmentEventPublisher>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            assignment_repo,
            ledger_repo,
            publisher,
            window: config.reminder_window(),
            cooldown: config.reminder_cooldown(),
            period: config.reminder_interval(),
        }
    }

    /// 执行一轮扫描
    ///
    /// 条件: 0 < 距截止 ≤ 窗口,且从未提醒或距上次提醒已过冷却时间
    #[instrument(skip_all, fields(now = %now))]
    pub fn tick(&self, now: DateTime<Utc>) -> RepositoryResult<ReminderTickReport> {
        let mut report = ReminderTickReport::default();

        for view in self.assignment_repo.find_pending()? {
            report.checked += 1;
            let assignment_id = view.assignment.assignment_id.clone();

            let remaining = view.assignment.deadline - now;
            if remaining <= Duration::zero() || remaining > self.window {
                report.skipped += 1;
                continue;
            }

            let due = match self.ledger_repo.get(&assignment_id) {
                Ok(Some(entry)) => entry.cooled_down(now, self.cooldown),
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!(assignment_id = %assignment_id, error = %e, "读取提醒台账失败");
                    report.failed += 1;
                    continue;
                }
            };
            if !due {
                report.skipped += 1;
                continue;
            }

            let event = AssignmentEvent::new(AssignmentEventType::DeadlineReminder, view);
            if let Err(e) = self.publisher.publish(event) {
                tracing::warn!(assignment_id = %assignment_id, error = %e, "截止提醒发送失败");
                report.failed += 1;
                continue;
            }

            match self.ledger_repo.record_sent(&assignment_id, now) {
                Ok(entry) => {
                    tracing::debug!(
                        assignment_id = %assignment_id,
                        reminder_count = entry.reminder_count,
                        "截止提醒已发送"
                    );
                }
                // 台账丢失只会导致重复提醒
                Err(e) => {
                    tracing::warn!(assignment_id = %assignment_id, error = %e, "提醒台账写入失败");
                }
            }
            report.sent += 1;
        }

        tracing::info!(
            checked = report.checked,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "截止提醒扫描完成"
        );
        Ok(report)
    }

    /// 启动后台调度（立即执行首轮,之后按周期执行）
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(period_secs = self.period.as_secs(), "截止提醒调度已启动");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now()) {
                            tracing::error!(error = %e, "截止提醒扫描失败");
                        }
                    }
                }
            }
            tracing::info!("截止提醒调度已退出");
        });

        WorkerHandle::new("deadline_reminder_scheduler", shutdown_tx, join)
    }
}
