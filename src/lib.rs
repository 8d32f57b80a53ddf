// ==========================================
// 临期库存应急调拨系统 - 核心库
// ==========================================
// 系统定位: 临期应急库存在网点配送员之间的公平分派
// 技术栈: Rust + SQLite + tokio
// ==========================================

// 初始化国际化系统（通知模板）
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 分级、评分、公平分派
pub mod engine;

// 服务层 - 分派落库、通知、提醒调度
pub mod services;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组件装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{AssignmentStatus, DispenserStatus, RiskLevel, UrgencyBucket};

// 领域实体
pub use domain::{
    AssignmentRequest, AssignmentView, Dispenser, DispenserWorkload, EmergencyAssignment,
    StockItem,
};

// 引擎
pub use engine::{AllocationTable, EquitableDistributor, RiskClassifier, WorkloadScorer};

// API
pub use api::{ApiError, AssignmentApi, ValidationError};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "临期库存应急调拨系统";
