//! 跨模块共享的表行结构

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::enums::{AmuletStatus, CheckinMethod};

/// 寺庙
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleRecord {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub main_deity: Option<String>,
    pub description: Option<String>,
    pub images: serde_json::Value,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub opening_hours: Option<serde_json::Value>,
    pub checkin_radius: i32,
    pub checkin_merit_points: i64,
    /// 仅管理端可见
    #[serde(skip_serializing)]
    pub nfc_uid: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const TEMPLE_COLUMNS: &str = "id, name, address, latitude, longitude, main_deity, description, \
     images, phone, email, website, opening_hours, checkin_radius, checkin_merit_points, nfc_uid, \
     is_active, created_at, updated_at";

/// 护身符
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmuletRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub energy: i32,
    pub status: AmuletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const AMULET_COLUMNS: &str = "id, user_id, name, energy, status, created_at, updated_at";

/// 签到记录
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRecord {
    pub id: i64,
    pub user_id: i64,
    pub amulet_id: Option<i64>,
    pub temple_id: Option<i64>,
    pub method: CheckinMethod,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub distance_meters: Option<f64>,
    pub notes: Option<String>,
    pub blessing_points: i64,
    pub checkin_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

pub const CHECKIN_COLUMNS: &str = "id, user_id, amulet_id, temple_id, method, latitude, longitude, \
     distance_meters, notes, blessing_points, checkin_date, created_at";
