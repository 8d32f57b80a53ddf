// ==========================================
// 临期库存应急调拨系统 - 应急分派领域模型
// ==========================================
// 红线: 同一库存条目的 pending 分派数量之和 ≤ 库存数量
// 红线: 分派的配送员网点必须与库存条目网点一致
// 红线: 分派只能由 AssignmentCreator 创建
// ==========================================

use crate::domain::types::{AssignmentStatus, RiskLevel};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// EmergencyAssignment - 应急分派记录
// ==========================================
// 对齐: emergency_assignment 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyAssignment {
    // ===== 主键与关联 =====
    pub assignment_id: String,
    pub stock_item_id: String,
    pub dispenser_id: String,

    // ===== 分派内容 =====
    pub assigned_quantity: i64, // > 0
    pub deadline: DateTime<Utc>,
    pub status: AssignmentStatus,
    pub notes: Option<String>,

    // ===== 审计字段 =====
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmergencyAssignment {
    /// 计划时长（天，可带小数）: deadline − assigned_at
    pub fn lead_time_days(&self) -> f64 {
        (self.deadline - self.assigned_at).num_seconds() as f64 / 86_400.0
    }
}

// ==========================================
// AssignmentView - 分派记录 + 展示字段
// ==========================================
// 用途: 返回给调用方（库存与配送员 JOIN 后的展示信息）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: EmergencyAssignment,

    // ===== JOIN 字段（可能缺失）=====
    pub product_name: Option<String>,
    pub branch_id: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub dispenser_name: Option<String>,
    pub dispenser_contact: Option<String>,
}

// ==========================================
// AssignmentRequest - 分派创建请求（尚未落库）
// ==========================================
// 来源: 公平分派 execute 阶段 / 人工单条分派
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub stock_item_id: String,
    pub dispenser_id: String,
    pub quantity: i64,
    pub risk_level: Option<RiskLevel>, // 公平分派路径时记录所属风险类别
}

impl AssignmentRequest {
    pub fn new(stock_item_id: &str, dispenser_id: &str, quantity: i64) -> Self {
        Self {
            stock_item_id: stock_item_id.to_string(),
            dispenser_id: dispenser_id.to_string(),
            quantity,
            risk_level: None,
        }
    }
}
