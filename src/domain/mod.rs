// ==========================================
// 临期库存应急调拨系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、状态机规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod assignment;
pub mod dispenser;
pub mod movement;
pub mod notification;
pub mod reminder;
pub mod stock;
pub mod types;

// 重导出核心类型
pub use assignment::{AssignmentRequest, AssignmentView, EmergencyAssignment};
pub use dispenser::{Dispenser, DispenserWorkload};
pub use movement::{MovementRecord, MOVEMENT_TYPE_EMERGENCY_ASSIGNMENT};
pub use notification::{NotificationMessage, NotificationTask};
pub use reminder::ReminderLedgerEntry;
pub use stock::StockItem;
pub use types::{
    AssignmentStatus, DispenserStatus, NotificationStatus, NotificationType, RiskLevel,
    UrgencyBucket,
};
