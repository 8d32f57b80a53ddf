// ==========================================
// 临期库存应急调拨系统 - 后台任务句柄
// ==========================================
// 职责: 持有后台任务的停止信号与 JoinHandle
// ==========================================

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 后台任务句柄（投递任务 / 提醒调度）
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(name: &'static str, shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join,
        }
    }

    /// 发送停止信号并等待任务退出
    pub async fn shutdown(self) {
        // 接收端已退出时发送失败,任务本身也已结束
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(worker = self.name, error = %e, "后台任务退出异常");
        } else {
            tracing::info!(worker = self.name, "后台任务已停止");
        }
    }

    /// 任务是否已退出（未收到停止信号即退出视为异常）
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
