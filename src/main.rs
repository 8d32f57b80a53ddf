// ==========================================
// 临期库存应急调拨系统 - 后台进程入口
// ==========================================
// 职责: 托管通知投递任务与截止提醒调度
// 数据库: EMERGENCY_DISPATCH_DB 或系统数据目录
// ==========================================

use std::sync::Arc;

use anyhow::{anyhow, Context};
use emergency_dispatch::app::{default_db_path, AppState};
use emergency_dispatch::services::LogNotificationSender;
use emergency_dispatch::{logging, APP_NAME, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", APP_NAME);
    tracing::info!("系统版本: {}", VERSION);
    tracing::info!("==================================================");

    let db_path = default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;
    let workers = state
        .start_workers(Arc::new(LogNotificationSender))
        .map_err(|e| anyhow!(e))?;
    tracing::info!(workers = workers.len(), "后台任务已启动,按 Ctrl+C 退出");

    tokio::signal::ctrl_c()
        .await
        .context("等待退出信号失败")?;

    tracing::info!("收到退出信号,正在停止后台任务...");
    if workers.iter().any(|w| w.is_finished()) {
        tracing::warn!("部分后台任务在退出信号前已结束");
    }
    futures::future::join_all(workers.into_iter().map(|w| w.shutdown())).await;
    tracing::info!("已退出");
    Ok(())
}
