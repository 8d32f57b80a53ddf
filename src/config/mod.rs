// ==========================================
// 临期库存应急调拨系统 - 配置层
// ==========================================
// 职责: 系统配置管理,支持覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, DispatchConfig};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "EMERGENCY_DISPATCH_DB";

/// 获取默认数据库路径
///
/// 优先级: 环境变量 EMERGENCY_DISPATCH_DB > 系统数据目录 > 当前目录
pub fn default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        if !path.trim().is_empty() {
            return path;
        }
    }

    if let Some(data_dir) = dirs::data_dir() {
        let app_dir = data_dir.join("emergency-dispatch");
        if let Err(e) = std::fs::create_dir_all(&app_dir) {
            tracing::warn!("无法创建数据目录 {:?}: {}", app_dir, e);
        } else {
            return app_dir.join("emergency_dispatch.db").to_string_lossy().to_string();
        }
    }

    "emergency_dispatch.db".to_string()
}
