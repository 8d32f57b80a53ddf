// ==========================================
// 临期库存应急调拨系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑（库存不变量复核除外）
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod assignment_repo;
pub(crate) mod codec;
pub mod dispenser_repo;
pub mod error;
pub mod movement_repo;
pub mod reminder_ledger_repo;
pub mod stock_repo;

// 重导出核心仓储
pub use assignment_repo::AssignmentRepository;
pub use dispenser_repo::DispenserRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use movement_repo::MovementRepository;
pub use reminder_ledger_repo::ReminderLedgerRepository;
pub use stock_repo::StockItemRepository;
