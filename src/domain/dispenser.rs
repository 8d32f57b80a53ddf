// ==========================================
// 临期库存应急调拨系统 - 配送员领域模型
// ==========================================
// 红线: Dispenser 对本系统只读
// 红线: DispenserWorkload 每轮重算,不落库,不是事实来源
// ==========================================

use crate::domain::types::DispenserStatus;
use serde::{Deserialize, Serialize};

// ==========================================
// Dispenser - 配送员
// ==========================================
// 对齐: dispenser 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispenser {
    pub dispenser_id: String,
    pub name: String,
    pub branch_id: String,
    pub contact: Option<String>, // 联系方式（手机号）
    pub status: DispenserStatus,
}

impl Dispenser {
    pub fn is_active(&self) -> bool {
        self.status == DispenserStatus::Active
    }
}

// ==========================================
// DispenserWorkload - 配送员负荷（派生）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenserWorkload {
    pub dispenser_id: String,

    // ===== 分桶计数 =====
    pub critical_count: u32,
    pub high_count: u32,
    pub low_count: u32,
    pub expired_count: u32, // 预留槽位

    // ===== 累计调拨量 =====
    pub total_quantity: i64,

    // ===== 负荷评分 =====
    pub workload_score: f64,
}

impl DispenserWorkload {
    /// 无历史记录的空负荷
    pub fn empty(dispenser_id: &str) -> Self {
        Self {
            dispenser_id: dispenser_id.to_string(),
            critical_count: 0,
            high_count: 0,
            low_count: 0,
            expired_count: 0,
            total_quantity: 0,
            workload_score: 0.0,
        }
    }
}
