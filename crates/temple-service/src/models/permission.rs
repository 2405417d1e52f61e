//! 寺庙管理员权限
//!
//! 角色提供默认权限，账号上的 `permissions` JSON 对象可以逐项覆盖。

use serde::{Deserialize, Serialize};

use super::enums::TempleAdminRole;

/// 寺庙后台权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplePermission {
    ManageInfo,
    ViewStats,
    ManageProducts,
    ManageOrders,
    ManageAnnouncements,
    ManageRewards,
    ManageEvents,
    ManageAdmins,
}

impl TemplePermission {
    pub const ALL: [TemplePermission; 8] = [
        Self::ManageInfo,
        Self::ViewStats,
        Self::ManageProducts,
        Self::ManageOrders,
        Self::ManageAnnouncements,
        Self::ManageRewards,
        Self::ManageEvents,
        Self::ManageAdmins,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageInfo => "manage_info",
            Self::ViewStats => "view_stats",
            Self::ManageProducts => "manage_products",
            Self::ManageOrders => "manage_orders",
            Self::ManageAnnouncements => "manage_announcements",
            Self::ManageRewards => "manage_rewards",
            Self::ManageEvents => "manage_events",
            Self::ManageAdmins => "manage_admins",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }

    /// 角色默认是否拥有该权限
    pub fn granted_by_default(&self, role: TempleAdminRole) -> bool {
        match role {
            TempleAdminRole::Owner => true,
            TempleAdminRole::Manager => !matches!(self, Self::ManageAdmins),
            TempleAdminRole::Staff => matches!(
                self,
                Self::ViewStats | Self::ManageAnnouncements | Self::ManageOrders
            ),
        }
    }
}

/// 计算账号的有效权限
///
/// `overrides` 形如 `{"manage_products": true, "view_stats": false}`，
/// 未出现的键沿用角色默认值，非布尔值被忽略。
pub fn effective_permissions(
    role: TempleAdminRole,
    overrides: Option<&serde_json::Value>,
) -> Vec<TemplePermission> {
    let overrides = overrides.and_then(|v| v.as_object());

    TemplePermission::ALL
        .into_iter()
        .filter(|perm| {
            overrides
                .and_then(|map| map.get(perm.as_str()))
                .and_then(|v| v.as_bool())
                .unwrap_or_else(|| perm.granted_by_default(role))
        })
        .collect()
}

/// 权限列表转为 JWT 中携带的字符串
pub fn permission_names(perms: &[TemplePermission]) -> Vec<String> {
    perms.iter().map(|p| p.as_str().to_string()).collect()
}
