// ==========================================
// 临期库存应急调拨系统 - 库存领域模型
// ==========================================
// 红线: 本系统只读 quantity / expiry_date / is_emergency,不直接扣减库存
// 用途: 上传/应急声明由外部写入,引擎层只读
// ==========================================

use crate::domain::types::RiskLevel;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// StockItem - 库存条目
// ==========================================
// 对齐: stock_item 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItem {
    // ===== 主键 =====
    pub stock_item_id: String,

    // ===== 基础信息 =====
    pub product_name: String,
    pub branch_id: String, // 所属网点
    pub quantity: i64,     // 当前数量 (≥0)
    pub unit_price: f64,   // 单价

    // ===== 有效期与应急标记 =====
    pub expiry_date: NaiveDate,
    pub is_emergency: bool,
    pub emergency_declared_at: Option<DateTime<Utc>>,

    // ===== 派生字段（RiskClassifier 输出）=====
    pub risk_level: Option<RiskLevel>,
}

impl StockItem {
    /// 距离过期的天数（过期后为负数）
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    /// 是否已过期
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.days_to_expiry(today) < 0
    }
}
