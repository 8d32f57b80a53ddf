// ==========================================
// 临期库存应急调拨系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换Repository错误为用户友好的错误消息
// 红线: 校验错误在任何写入之前同步返回
// ==========================================

use crate::engine::distributor::DistributionError;
use crate::repository::error::RepositoryError;
use chrono::NaiveDate;
use thiserror::Error;

// ==========================================
// ValidationError - 分派校验错误
// ==========================================

/// 分派校验错误（写入前拦截，零副作用）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("库存已过期: stock_item_id={stock_item_id}, expiry_date={expiry_date}")]
    ExpiredItem {
        stock_item_id: String,
        expiry_date: NaiveDate,
    },

    #[error("分派数量超出可用库存: stock_item_id={stock_item_id}, requested={requested}, available={available}")]
    OverAssignment {
        stock_item_id: String,
        requested: i64,
        available: i64,
    },

    #[error("配送员与库存不属于同一网点: stock_item_id={stock_item_id}, branch={branch_id}, dispensers={dispensers:?}")]
    BranchMismatch {
        stock_item_id: String,
        branch_id: String,
        dispensers: Vec<String>,
    },

    #[error("没有有效的分派数量: stock_item_id={stock_item_id}")]
    NoAssignments { stock_item_id: String },

    #[error("当前网点没有可用配送员")]
    NoDispensersAvailable,

    #[error("缺少截止时间")]
    MissingDeadline,
}

// ==========================================
// ApiError - API层错误
// ==========================================

/// API层错误类型
/// 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("校验失败: {0}")]
    Validation(#[from] ValidationError),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DistributionError> for ApiError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::NoDispensersAvailable => {
                ApiError::Validation(ValidationError::NoDispensersAvailable)
            }
            DistributionError::InconsistentTable(_) => ApiError::InvalidInput(err.to_string()),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将Repository层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::CheckConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("检查约束违反: {}", msg))
            }

            // 业务规则错误
            RepositoryError::OverAllocation {
                stock_item_id,
                requested,
                available,
            } => ApiError::Validation(ValidationError::OverAssignment {
                stock_item_id,
                requested,
                available,
            }),
            RepositoryError::BusinessRuleViolation(msg) => ApiError::BusinessRuleViolation(msg),
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }

            // 数据质量错误
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }

            // 通用错误
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl ApiError {
    /// 是否为写入前的校验错误
    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::Validation(_))
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_over_allocation_maps_to_validation() {
        let err: ApiError = RepositoryError::OverAllocation {
            stock_item_id: "S1".to_string(),
            requested: 4,
            available: 3,
        }
        .into();
        assert!(err.is_validation());
        assert!(err.to_string().contains("requested=4"));
    }

    #[test]
    fn test_distribution_error_maps_to_validation() {
        let err: ApiError = DistributionError::NoDispensersAvailable.into();
        assert!(matches!(
            err,
            ApiError::Validation(ValidationError::NoDispensersAvailable)
        ));
    }

    #[test]
    fn test_inconsistent_table_maps_to_invalid_input() {
        let err: ApiError = DistributionError::InconsistentTable("D9".to_string()).into();
        match err {
            ApiError::InvalidInput(msg) => assert!(msg.contains("D9")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_branch_mismatch_names_dispensers() {
        let err = ValidationError::BranchMismatch {
            stock_item_id: "S1".to_string(),
            branch_id: "B1".to_string(),
            dispensers: vec!["D8".to_string(), "D9".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("D8") && msg.contains("D9"));
    }
}
