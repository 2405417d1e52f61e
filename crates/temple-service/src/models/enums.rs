//! 领域枚举
//!
//! 数据库中以 varchar 存储，JSON 中使用 snake_case。

use serde::{Deserialize, Serialize};

/// 账号类型，对应三张账号表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Public,
    TempleAdmin,
    SuperAdmin,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::TempleAdmin => "temple_admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// 账号所在的数据表
    pub fn table(&self) -> &'static str {
        match self {
            Self::Public => "public_users",
            Self::TempleAdmin => "temple_admin_users",
            Self::SuperAdmin => "super_admin_users",
        }
    }
}

/// 寺庙管理员角色
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TempleAdminRole {
    Owner,
    Manager,
    #[default]
    Staff,
}

/// 护身符状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AmuletStatus {
    #[default]
    Active,
    Inactive,
    Expired,
}

/// 能量变动原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EnergyReason {
    Checkin,
    Manual,
    Consume,
}

/// 签到方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CheckinMethod {
    #[default]
    Manual,
    Gps,
    Nfc,
    QrCode,
}

impl CheckinMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Gps => "gps",
            Self::Nfc => "nfc",
            Self::QrCode => "qr_code",
        }
    }

    /// 除手动签到外都必须指定寺庙
    pub fn requires_temple(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// 签到奖励类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RewardType {
    /// 首次在寺庙签到
    FirstTime,
    /// 每日签到加成
    DailyBonus,
    /// 连续签到 N 天
    ConsecutiveDays,
    /// 累计签到 N 次
    TotalCount,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstTime => "first_time",
            Self::DailyBonus => "daily_bonus",
            Self::ConsecutiveDays => "consecutive_days",
            Self::TotalCount => "total_count",
        }
    }
}

/// 奖励领取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ClaimType {
    Auto,
    Manual,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// 兑换订单状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Completed,
    Cancelled,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 订单状态机：pending → processing → shipped → completed，
    /// pending 与 processing 可取消
    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        use RedemptionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Completed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    /// 中文显示名，用于通知
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "待处理",
            Self::Processing => "处理中",
            Self::Shipped => "已出货",
            Self::Completed => "已完成",
            Self::Cancelled => "已取消",
        }
    }
}

/// 功德值流水类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PointKind {
    Checkin,
    Reward,
    Redemption,
    Refund,
    AdminAdjust,
}

impl PointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkin => "checkin",
            Self::Reward => "reward",
            Self::Redemption => "redemption",
            Self::Refund => "refund",
            Self::AdminAdjust => "admin_adjust",
        }
    }
}

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    RewardReceived,
    RedemptionStatus,
    TempleAnnouncement,
    SystemAnnouncement,
    CheckinMilestone,
    EventRegistration,
}

/// 公告类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AnnouncementType {
    Event,
    Festival,
    Maintenance,
    #[default]
    News,
    Important,
}

/// 公告优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AnnouncementPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// 活动状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Draft,
    Published,
    Closed,
    Canceled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Closed => "closed",
            Self::Canceled => "canceled",
        }
    }

    /// draft → published → closed；published 或 closed 可取消
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Draft, Published) | (Published, Closed) | (Published, Canceled) | (Closed, Canceled)
        )
    }
}

/// 报名状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RegistrationStatus {
    Registered,
    Canceled,
    Waitlist,
}

/// 进香登记状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PilgrimageStatus {
    #[default]
    Pending,
    Confirmed,
    Rejected,
    Completed,
    Canceled,
}

impl PilgrimageStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redemption_transitions() {
        use RedemptionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));

        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_event_transitions() {
        use EventStatus::*;
        assert!(Draft.can_transition_to(Published));
        assert!(Published.can_transition_to(Closed));
        assert!(Published.can_transition_to(Canceled));
        assert!(Closed.can_transition_to(Canceled));
        assert!(!Draft.can_transition_to(Closed));
        assert!(!Canceled.can_transition_to(Published));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&CheckinMethod::QrCode).unwrap(), "\"qr_code\"");
        assert_eq!(
            serde_json::to_string(&AccountType::TempleAdmin).unwrap(),
            "\"temple_admin\""
        );
        let t: RewardType = serde_json::from_str("\"consecutive_days\"").unwrap();
        assert_eq!(t, RewardType::ConsecutiveDays);
    }

    #[test]
    fn test_requires_temple() {
        assert!(!CheckinMethod::Manual.requires_temple());
        assert!(CheckinMethod::Gps.requires_temple());
        assert!(CheckinMethod::Nfc.requires_temple());
        assert!(CheckinMethod::QrCode.requires_temple());
    }

    #[test]
    fn test_pilgrimage_status_parse() {
        assert_eq!(PilgrimageStatus::parse("confirmed"), Some(PilgrimageStatus::Confirmed));
        assert_eq!(PilgrimageStatus::parse(" canceled "), Some(PilgrimageStatus::Canceled));
        assert_eq!(PilgrimageStatus::parse("cancelled"), None);
        assert_eq!(PilgrimageStatus::parse(""), None);
    }
}
