//! 领域模型
//!
//! 跨模块共享的枚举、权限定义与表行结构；只在单个 handler 使用的行结构定义在各自文件中。

pub mod accounts;
pub mod enums;
pub mod permission;
pub mod records;

pub use accounts::{
    PUBLIC_USER_COLUMNS, PublicUserRecord, SUPER_ADMIN_COLUMNS, SuperAdminRecord,
    TEMPLE_ADMIN_COLUMNS, TempleAdminRecord, TempleAdminView,
};
pub use enums::{
    AccountType, AmuletStatus, AnnouncementPriority, AnnouncementType, CheckinMethod, ClaimType,
    EnergyReason, EventStatus, NotificationType, PilgrimageStatus, PointKind, RedemptionStatus,
    RegistrationStatus, RewardType, TempleAdminRole,
};
pub use permission::{TemplePermission, effective_permissions, permission_names};
pub use records::{
    AMULET_COLUMNS, AmuletRecord, CHECKIN_COLUMNS, CheckinRecord, TEMPLE_COLUMNS, TempleRecord,
};
