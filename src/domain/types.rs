// ==========================================
// 临期库存应急调拨系统 - 领域类型定义
// ==========================================
// 红线: 风险等级由剩余有效期推导,不是人工录入
// 红线: 分派状态只允许 pending → completed / cancelled
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 风险等级 (Risk Level)
// ==========================================
// 依据: 剩余有效天数分级
// 顺序: Expired < Critical < High < MediumHigh < Medium < Low < VeryLow
// (越靠前越紧急)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Expired,    // 已过期
    Critical,   // ≤30天
    High,       // ≤60天
    MediumHigh, // ≤120天
    Medium,     // ≤180天
    Low,        // ≤365天
    VeryLow,    // >365天
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RiskLevel {
    /// 从字符串解析风险等级
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "expired" => Some(RiskLevel::Expired),
            "critical" => Some(RiskLevel::Critical),
            "high" => Some(RiskLevel::High),
            "medium-high" => Some(RiskLevel::MediumHigh),
            "medium" => Some(RiskLevel::Medium),
            "low" => Some(RiskLevel::Low),
            "very-low" => Some(RiskLevel::VeryLow),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Expired => "expired",
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::MediumHigh => "medium-high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
            RiskLevel::VeryLow => "very-low",
        }
    }

    /// 公平分派处理顺序（固定优先级）
    ///
    /// 已过期材料不进入本子系统；medium-high / medium 不参与公平分派
    pub const DISTRIBUTION_ORDER: [RiskLevel; 4] = [
        RiskLevel::Critical,
        RiskLevel::High,
        RiskLevel::Low,
        RiskLevel::VeryLow,
    ];

    /// 是否参与公平分派
    pub fn is_distributable(&self) -> bool {
        Self::DISTRIBUTION_ORDER.contains(self)
    }
}

// ==========================================
// 负荷紧急分桶 (Urgency Bucket)
// ==========================================
// 依据: deadline − assigned_at 的天数
// 注意: 与 RiskLevel 的有效期阈值是两套独立口径,不可合并
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyBucket {
    Critical, // ≤1天
    High,     // ≤3天
    Low,      // 其他
    Expired,  // 预留槽位,当前无任何路径写入
}

impl fmt::Display for UrgencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrgencyBucket::Critical => write!(f, "critical"),
            UrgencyBucket::High => write!(f, "high"),
            UrgencyBucket::Low => write!(f, "low"),
            UrgencyBucket::Expired => write!(f, "expired"),
        }
    }
}

// ==========================================
// 分派状态 (Assignment Status)
// ==========================================
// 状态机: pending → completed | cancelled (均为终态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Pending,   // 待执行
    Completed, // 已完成
    Cancelled, // 已取消
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AssignmentStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(AssignmentStatus::Pending),
            "completed" => Some(AssignmentStatus::Completed),
            "cancelled" => Some(AssignmentStatus::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssignmentStatus::Pending)
    }

    /// 是否允许迁移到目标状态
    pub fn can_transition_to(&self, to: AssignmentStatus) -> bool {
        matches!(
            (self, to),
            (AssignmentStatus::Pending, AssignmentStatus::Completed)
                | (AssignmentStatus::Pending, AssignmentStatus::Cancelled)
        )
    }
}

// ==========================================
// 配送员状态 (Dispenser Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispenserStatus {
    Active,   // 在岗
    Inactive, // 停用
}

impl DispenserStatus {
    /// 从字符串解析状态（未知值视为停用）
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => DispenserStatus::Active,
            _ => DispenserStatus::Inactive,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            DispenserStatus::Active => "active",
            DispenserStatus::Inactive => "inactive",
        }
    }
}

// ==========================================
// 通知类型 (Notification Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AssignmentCreated,
    AssignmentCompleted,
    AssignmentCancelled,
    DeadlineReminder,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::AssignmentCreated => "assignment_created",
            NotificationType::AssignmentCompleted => "assignment_completed",
            NotificationType::AssignmentCancelled => "assignment_cancelled",
            NotificationType::DeadlineReminder => "deadline_reminder",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "assignment_created" => Some(NotificationType::AssignmentCreated),
            "assignment_completed" => Some(NotificationType::AssignmentCompleted),
            "assignment_cancelled" => Some(NotificationType::AssignmentCancelled),
            "deadline_reminder" => Some(NotificationType::DeadlineReminder),
            _ => None,
        }
    }

    /// 对应的 i18n 模板键
    pub fn template_key(&self) -> &'static str {
        match self {
            NotificationType::AssignmentCreated => "notification.assignment_created",
            NotificationType::AssignmentCompleted => "notification.assignment_completed",
            NotificationType::AssignmentCancelled => "notification.assignment_cancelled",
            NotificationType::DeadlineReminder => "notification.deadline_reminder",
        }
    }
}

// ==========================================
// 通知投递状态 (Notification Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,   // 等待投递
    Sending,   // 投递中
    Sent,      // 已投递
    Failed,    // 达到最大重试次数
    Cancelled, // 已取消
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Sending => "SENDING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Failed => "FAILED",
            NotificationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PENDING" => NotificationStatus::Pending,
            "SENDING" => NotificationStatus::Sending,
            "SENT" => NotificationStatus::Sent,
            "CANCELLED" => NotificationStatus::Cancelled,
            _ => NotificationStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_roundtrip_str() {
        for level in [
            RiskLevel::Expired,
            RiskLevel::Critical,
            RiskLevel::High,
            RiskLevel::MediumHigh,
            RiskLevel::Medium,
            RiskLevel::Low,
            RiskLevel::VeryLow,
        ] {
            assert_eq!(RiskLevel::from_str(level.as_str()), Some(level));
        }
        assert_eq!(RiskLevel::from_str("unknown"), None);
    }

    #[test]
    fn test_only_four_tiers_distributable() {
        assert!(RiskLevel::Critical.is_distributable());
        assert!(RiskLevel::VeryLow.is_distributable());
        assert!(!RiskLevel::Expired.is_distributable());
        assert!(!RiskLevel::MediumHigh.is_distributable());
        assert!(!RiskLevel::Medium.is_distributable());
    }

    #[test]
    fn test_assignment_status_transitions() {
        use AssignmentStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Pending));
        assert!(Completed.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn test_risk_level_serde_kebab_case() {
        let json = serde_json::to_string(&RiskLevel::MediumHigh).unwrap();
        assert_eq!(json, "\"medium-high\"");
    }
}
