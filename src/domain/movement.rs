// ==========================================
// 临期库存应急调拨系统 - 调拨流水领域模型
// ==========================================
// 红线: 流水只追加,不修改
// 对齐: movement_history 表
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 流水类型: 应急分派
pub const MOVEMENT_TYPE_EMERGENCY_ASSIGNMENT: &str = "EMERGENCY_ASSIGNMENT";

// ==========================================
// MovementRecord - 调拨流水
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRecord {
    pub movement_id: String,
    pub stock_item_id: String,
    pub from_branch_id: String,
    pub dispenser_id: Option<String>,
    pub quantity_moved: i64,
    pub movement_type: String,
    pub reference_id: Option<String>, // 关联分派ID
    pub moved_by: String,
    pub moved_at: DateTime<Utc>,
    pub notes: Option<String>,
}
