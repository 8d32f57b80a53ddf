// ==========================================
// 临期库存应急调拨系统 - 应用层
// ==========================================
// 职责: 组件装配与后台任务生命周期
// ==========================================

pub mod state;

// 重导出
pub use state::AppState;
pub use crate::config::default_db_path;
