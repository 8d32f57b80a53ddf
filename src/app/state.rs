// ==========================================
// 临期库存应急调拨系统 - 应用状态
// ==========================================
// 职责: 组装 Repository / Engine / Service / API,并启动后台任务
// ==========================================

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::api::{AssignmentApi, AssignmentValidator};
use crate::config::{ConfigManager, DispatchConfig};
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::{AssignmentEventPublisher, OptionalEventPublisher};
use crate::repository::{
    AssignmentRepository, DispenserRepository, MovementRepository, ReminderLedgerRepository,
    StockItemRepository,
};
use crate::services::{
    AssignmentCreator, DeadlineReminderScheduler, NotificationDispatcher, NotificationProducer,
    NotificationQueue, NotificationSender, WorkerHandle,
};

/// 应用状态
///
/// 持有共享连接上的全部组件；后台任务通过 `start_workers` 启动
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 启动时加载的调度配置
    pub config: DispatchConfig,

    pub config_manager: Arc<ConfigManager>,

    /// 应急分派API
    pub assignment_api: Arc<AssignmentApi>,

    pub stock_repo: Arc<StockItemRepository>,
    pub dispenser_repo: Arc<DispenserRepository>,
    pub assignment_repo: Arc<AssignmentRepository>,
    pub movement_repo: Arc<MovementRepository>,
    pub ledger_repo: Arc<ReminderLedgerRepository>,

    /// 通知出站队列
    pub notification_queue: Arc<NotificationQueue>,

    /// 通知生产者（同时作为分派事件发布者）
    pub notification_producer: Arc<NotificationProducer>,

    /// 投递唤醒通道接收端（由 start_workers 取走）
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库表结构初始化失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager
            .load_dispatch_config()
            .map_err(|e| format!("调度配置加载失败: {}", e))?;
        tracing::info!(
            reminder_window_hours = config.reminder_window_hours,
            reminder_cooldown_hours = config.reminder_cooldown_hours,
            locale = %config.locale,
            "调度配置已加载"
        );

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let stock_repo = Arc::new(StockItemRepository::new(conn.clone()));
        let dispenser_repo = Arc::new(DispenserRepository::new(conn.clone()));
        let assignment_repo = Arc::new(AssignmentRepository::new(conn.clone()));
        let movement_repo = Arc::new(MovementRepository::new(conn.clone()));
        let ledger_repo = Arc::new(ReminderLedgerRepository::new(conn.clone()));
        let notification_queue = Arc::new(NotificationQueue::new(conn));

        // ==========================================
        // 初始化Service层
        // ==========================================
        let (trigger_tx, trigger_rx) = mpsc::channel(config.notification_channel_capacity.max(1));
        let notification_producer = Arc::new(
            NotificationProducer::new(notification_queue.clone(), &config).with_trigger(trigger_tx),
        );

        // 使用事件发布器而非直接依赖通知队列，实现依赖倒置
        let publisher = OptionalEventPublisher::with_publisher(
            notification_producer.clone() as Arc<dyn AssignmentEventPublisher>,
        );
        let creator = Arc::new(AssignmentCreator::new(
            assignment_repo.clone(),
            movement_repo.clone(),
            publisher,
        ));

        // ==========================================
        // 初始化API层
        // ==========================================
        let validator = Arc::new(AssignmentValidator::new(
            assignment_repo.clone(),
            dispenser_repo.clone(),
        ));
        let assignment_api = Arc::new(AssignmentApi::new(
            stock_repo.clone(),
            dispenser_repo.clone(),
            assignment_repo.clone(),
            validator,
            creator,
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            config,
            config_manager,
            assignment_api,
            stock_repo,
            dispenser_repo,
            assignment_repo,
            movement_repo,
            ledger_repo,
            notification_queue,
            notification_producer,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        })
    }

    /// 启动后台任务: 通知投递 + 截止提醒调度
    ///
    /// 须在 tokio 运行时内调用,且只能调用一次
    pub fn start_workers(
        &self,
        sender: Arc<dyn NotificationSender>,
    ) -> Result<Vec<WorkerHandle>, String> {
        let trigger_rx = self
            .trigger_rx
            .lock()
            .map_err(|e| format!("锁获取失败: {}", e))?
            .take()
            .ok_or_else(|| "后台任务已启动".to_string())?;

        match self.notification_queue.recover_in_flight() {
            Ok(0) => {}
            Ok(n) => tracing::info!(recovered = n, "已恢复上次未完成的通知任务"),
            Err(e) => tracing::warn!("恢复未完成的通知任务失败: {}", e),
        }

        let dispatcher = Arc::new(NotificationDispatcher::new(
            self.notification_queue.clone(),
            sender,
            self.config.clone(),
        ));
        let scheduler = Arc::new(DeadlineReminderScheduler::new(
            self.assignment_repo.clone(),
            self.ledger_repo.clone(),
            self.notification_producer.clone(),
            &self.config,
        ));

        Ok(vec![dispatcher.spawn(trigger_rx), scheduler.spawn()])
    }
}
