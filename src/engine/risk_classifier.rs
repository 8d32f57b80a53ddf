// ==========================================
// 临期库存应急调拨系统 - 风险分级引擎
// ==========================================
// 红线: 风险等级是"等级制",由剩余有效天数唯一决定
// ==========================================
// 输入: 剩余有效天数 (days_to_expiry)
// 输出: RiskLevel
// 阈值: <0 expired; ≤30 critical; ≤60 high; ≤120 medium-high;
//       ≤180 medium; ≤365 low; 其他 very-low
// ==========================================

use crate::domain::stock::StockItem;
use crate::domain::types::RiskLevel;
use chrono::NaiveDate;
use tracing::instrument;

// 分级阈值（天,闭区间上界）
const CRITICAL_MAX_DAYS: i64 = 30;
const HIGH_MAX_DAYS: i64 = 60;
const MEDIUM_HIGH_MAX_DAYS: i64 = 120; // ≤90 与 ≤120 两档均落入 medium-high
const MEDIUM_MAX_DAYS: i64 = 180;
const LOW_MAX_DAYS: i64 = 365;

// ==========================================
// RiskClassifier - 风险分级引擎
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskClassifier;

impl RiskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 按剩余有效天数分级（纯函数）
    pub fn classify(&self, days_to_expiry: i64) -> RiskLevel {
        match days_to_expiry {
            d if d < 0 => RiskLevel::Expired,
            d if d <= CRITICAL_MAX_DAYS => RiskLevel::Critical,
            d if d <= HIGH_MAX_DAYS => RiskLevel::High,
            d if d <= MEDIUM_HIGH_MAX_DAYS => RiskLevel::MediumHigh,
            d if d <= MEDIUM_MAX_DAYS => RiskLevel::Medium,
            d if d <= LOW_MAX_DAYS => RiskLevel::Low,
            _ => RiskLevel::VeryLow,
        }
    }

    /// 剩余有效天数（到期当天为 0）
    pub fn days_to_expiry(&self, expiry_date: NaiveDate, today: NaiveDate) -> i64 {
        (expiry_date - today).num_days()
    }

    /// 为库存条目填充派生风险等级
    #[instrument(skip(self, items), fields(count = items.len(), today = %today))]
    pub fn annotate(&self, items: Vec<StockItem>, today: NaiveDate) -> Vec<StockItem> {
        items
            .into_iter()
            .map(|mut item| {
                let days = self.days_to_expiry(item.expiry_date, today);
                item.risk_level = Some(self.classify(days));
                item
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_are_exact() {
        let c = RiskClassifier::new();
        let cases = [
            (-1, RiskLevel::Expired),
            (0, RiskLevel::Critical),
            (30, RiskLevel::Critical),
            (31, RiskLevel::High),
            (60, RiskLevel::High),
            (61, RiskLevel::MediumHigh),
            (90, RiskLevel::MediumHigh),
            (91, RiskLevel::MediumHigh),
            (120, RiskLevel::MediumHigh),
            (121, RiskLevel::Medium),
            (180, RiskLevel::Medium),
            (181, RiskLevel::Low),
            (365, RiskLevel::Low),
            (366, RiskLevel::VeryLow),
        ];
        for (days, expected) in cases {
            assert_eq!(c.classify(days), expected, "days={}", days);
        }
    }

    #[test]
    fn test_classify_is_idempotent() {
        let c = RiskClassifier::new();
        for days in [-30, 0, 45, 100, 200, 400] {
            assert_eq!(c.classify(days), c.classify(days));
        }
    }

    #[test]
    fn test_annotate_uses_today() {
        let c = RiskClassifier::new();
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let item = StockItem {
            stock_item_id: "S1".to_string(),
            product_name: "P".to_string(),
            branch_id: "B1".to_string(),
            quantity: 1,
            unit_price: 0.0,
            expiry_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            is_emergency: true,
            emergency_declared_at: None,
            risk_level: None,
        };
        let annotated = c.annotate(vec![item], today);
        assert_eq!(annotated[0].risk_level, Some(RiskLevel::Expired));
    }
}
