//! 三类账号的表行结构

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::enums::TempleAdminRole;
use super::permission::{TemplePermission, effective_permissions, permission_names};

/// 一般用户
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub blessing_points: i64,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PUBLIC_USER_COLUMNS: &str =
    "id, name, email, blessing_points, is_active, last_login_at, created_at, updated_at";

/// 寺庙管理员
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleAdminRecord {
    pub id: i64,
    pub temple_id: i64,
    pub name: String,
    pub email: String,
    pub role: TempleAdminRole,
    /// 按键覆盖角色默认权限
    pub permissions: Option<serde_json::Value>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const TEMPLE_ADMIN_COLUMNS: &str = "id, temple_id, name, email, role, permissions, is_active, \
     last_login_at, created_by, created_at, updated_at";

impl TempleAdminRecord {
    pub fn effective_permissions(&self) -> Vec<TemplePermission> {
        effective_permissions(self.role, self.permissions.as_ref())
    }
}

/// 带有效权限的寺庙管理员
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleAdminView {
    #[serde(flatten)]
    pub account: TempleAdminRecord,
    pub effective_permissions: Vec<String>,
}

impl From<TempleAdminRecord> for TempleAdminView {
    fn from(account: TempleAdminRecord) -> Self {
        let effective_permissions = permission_names(&account.effective_permissions());
        Self {
            account,
            effective_permissions,
        }
    }
}

/// 超级管理员
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperAdminRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const SUPER_ADMIN_COLUMNS: &str = "id, name, email, is_active, last_login_at, created_at";
