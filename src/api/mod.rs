// ==========================================
// 临期库存应急调拨系统 - API 层
// ==========================================
// 职责: 面向调用方的分派接口,统一错误类型
// ==========================================

pub mod assignment_api;
pub mod error;
pub mod validator;

// 重导出核心类型
pub use assignment_api::{AssignmentApi, BranchCycle, BranchLockRegistry};
pub use error::{ApiError, ApiResult, ValidationError};
pub use validator::{AssignmentValidator, ValidationInput};
