//! 签到流程
//!
//! 锁定用户行后依次校验护身符、寺庙与签到方式，写入签到、能量、功德值流水，
//! 最后执行奖励自动发放。整个流程在调用方的事务中完成。

use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use sqlx::PgConnection;
use temple_shared::config::CheckinConfig;
use temple_shared::observability::metrics;
use tracing::info;

use crate::engine::{self, GeoPoint, qr};
use crate::error::{ApiError, Result, is_unique_violation};
use crate::models::{
    AMULET_COLUMNS, AmuletRecord, AmuletStatus, CHECKIN_COLUMNS, CheckinMethod, CheckinRecord,
    EnergyReason, NotificationType, PointKind, TEMPLE_COLUMNS, TempleRecord,
};
use crate::service::ledger::{self, PointChange};
use crate::service::notification::{self, NewNotification};
use crate::service::reward::{self, GrantedReward, PgRewardStore};

/// 签到请求
#[derive(Debug, Clone, Default)]
pub struct CheckinCommand {
    pub amulet_id: i64,
    pub temple_id: Option<i64>,
    pub method: CheckinMethod,
    pub location: Option<GeoPoint>,
    pub nfc_uid: Option<String>,
    pub qr_token: Option<String>,
    pub notes: Option<String>,
}

/// 签到环境
#[derive(Debug, Clone, Copy)]
pub struct CheckinContext<'a> {
    pub config: &'a CheckinConfig,
    pub qr_secret: &'a str,
    pub today: NaiveDate,
}

/// 签到结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinOutcome {
    pub checkin: CheckinRecord,
    pub amulet: AmuletRecord,
    pub points_earned: i64,
    pub rewards_granted: Vec<GrantedReward>,
    pub blessing_points: i64,
    pub current_streak: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<i64>,
}

/// 签到方式所需的寺庙信息
#[derive(Debug, Clone, Default)]
pub struct TempleTarget {
    pub id: i64,
    pub location: Option<GeoPoint>,
    pub radius_meters: f64,
    pub nfc_uid: Option<String>,
}

impl From<&TempleRecord> for TempleTarget {
    fn from(t: &TempleRecord) -> Self {
        let location = match (t.latitude, t.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self {
            id: t.id,
            location,
            radius_meters: f64::from(t.checkin_radius),
            nfc_uid: t.nfc_uid.clone(),
        }
    }
}

/// 校验签到方式与地理围栏，返回与寺庙的距离（公尺）
pub fn verify_method(
    cmd: &CheckinCommand,
    temple: Option<&TempleTarget>,
    qr_secret: &str,
    today: NaiveDate,
) -> Result<Option<f64>> {
    let Some(temple) = temple else {
        if cmd.method.requires_temple() {
            return Err(ApiError::BadRequest("此签到方式必须指定寺庙".to_string()));
        }
        return Ok(None);
    };

    match cmd.method {
        CheckinMethod::Gps => {
            if cmd.location.is_none() {
                return Err(ApiError::Validation("GPS 签到需要提供座标".to_string()));
            }
            if temple.location.is_none() {
                return Err(ApiError::BadRequest(
                    "此寺庙尚未设定座标，无法使用 GPS 签到".to_string(),
                ));
            }
        }
        CheckinMethod::Nfc => {
            let matched = match (cmd.nfc_uid.as_deref(), temple.nfc_uid.as_deref()) {
                (Some(given), Some(expected)) => given.trim().eq_ignore_ascii_case(expected),
                _ => false,
            };
            if !matched {
                return Err(ApiError::BadRequest("NFC 标签与寺庙不符".to_string()));
            }
        }
        CheckinMethod::QrCode => {
            let valid = cmd
                .qr_token
                .as_deref()
                .is_some_and(|token| qr::verify_checkin_token(qr_secret, temple.id, today, token));
            if !valid {
                return Err(ApiError::BadRequest("QR 签到码无效或已过期".to_string()));
            }
        }
        CheckinMethod::Manual => {}
    }

    match (cmd.location, temple.location) {
        (Some(user), Some(target)) => {
            let distance = engine::distance_meters(user, target);
            if distance > temple.radius_meters {
                return Err(ApiError::OutOfRange {
                    distance_meters: distance,
                });
            }
            Ok(Some(distance))
        }
        _ => Ok(None),
    }
}

/// 执行签到，失败时记录拒绝原因指标
pub async fn perform_checkin(
    conn: &mut PgConnection,
    user_id: i64,
    cmd: &CheckinCommand,
    ctx: CheckinContext<'_>,
) -> Result<CheckinOutcome> {
    let started = Instant::now();
    match checkin_inner(conn, user_id, cmd, ctx).await {
        Ok(outcome) => {
            let scope = if outcome.checkin.temple_id.is_some() {
                "temple"
            } else {
                "general"
            };
            metrics::record_checkin(cmd.method.as_str(), scope, started.elapsed().as_secs_f64());
            Ok(outcome)
        }
        Err(e) => {
            metrics::record_checkin_rejection(e.error_code());
            Err(e)
        }
    }
}

async fn checkin_inner(
    conn: &mut PgConnection,
    user_id: i64,
    cmd: &CheckinCommand,
    ctx: CheckinContext<'_>,
) -> Result<CheckinOutcome> {
    let user = ledger::lock_user(conn, user_id).await?;

    let amulet_sql = format!(
        "SELECT {AMULET_COLUMNS} FROM amulets WHERE id = $1 AND user_id = $2 FOR UPDATE"
    );
    let amulet: AmuletRecord = sqlx::query_as(&amulet_sql)
        .bind(cmd.amulet_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ApiError::AmuletNotFound(cmd.amulet_id))?;
    if amulet.status != AmuletStatus::Active {
        return Err(ApiError::BadRequest("护身符未启用，无法签到".to_string()));
    }

    let temple = match cmd.temple_id {
        Some(temple_id) => {
            let sql = format!("SELECT {TEMPLE_COLUMNS} FROM temples WHERE id = $1");
            let temple: TempleRecord = sqlx::query_as(&sql)
                .bind(temple_id)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or(ApiError::TempleNotFound(temple_id))?;
            if !temple.is_active {
                return Err(ApiError::BadRequest("此寺庙暂不开放签到".to_string()));
            }
            Some(temple)
        }
        None => None,
    };

    let target = temple.as_ref().map(TempleTarget::from);
    let distance = verify_method(cmd, target.as_ref(), ctx.qr_secret, ctx.today)?;

    let amulet_done: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM checkins WHERE amulet_id = $1 AND checkin_date = $2)",
    )
    .bind(amulet.id)
    .bind(ctx.today)
    .fetch_one(&mut *conn)
    .await?;
    if amulet_done {
        return Err(ApiError::AlreadyCheckedIn);
    }

    if let Some(temple) = &temple {
        let temple_done: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM checkins
                WHERE user_id = $1 AND temple_id = $2 AND checkin_date = $3
            )
            "#,
        )
        .bind(user_id)
        .bind(temple.id)
        .bind(ctx.today)
        .fetch_one(&mut *conn)
        .await?;
        if temple_done {
            return Err(ApiError::AlreadyCheckedInTemple);
        }
    }

    // 签到前的连续天数，用于判断里程碑
    let dates: Vec<NaiveDate> = sqlx::query_scalar(
        "SELECT DISTINCT checkin_date FROM checkins WHERE user_id = $1 ORDER BY checkin_date DESC",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    let previous_streak = engine::current_streak(&dates, ctx.today);

    let points = temple
        .as_ref()
        .map(|t| t.checkin_merit_points)
        .unwrap_or(ctx.config.default_points);

    let insert_sql = format!(
        r#"
        INSERT INTO checkins
            (user_id, amulet_id, temple_id, method, latitude, longitude, distance_meters,
             notes, blessing_points, checkin_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {CHECKIN_COLUMNS}
        "#
    );
    let checkin: CheckinRecord = sqlx::query_as(&insert_sql)
        .bind(user_id)
        .bind(amulet.id)
        .bind(cmd.temple_id)
        .bind(cmd.method)
        .bind(cmd.location.map(|p| p.latitude))
        .bind(cmd.location.map(|p| p.longitude))
        .bind(distance)
        .bind(cmd.notes.as_deref())
        .bind(points)
        .bind(ctx.today)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, "uq_checkins_amulet_day") {
                ApiError::AlreadyCheckedIn
            } else if is_unique_violation(&e, "uq_checkins_user_temple_day") {
                ApiError::AlreadyCheckedInTemple
            } else {
                ApiError::Database(e)
            }
        })?;

    let energy = ctx.config.energy_per_checkin;
    let update_sql = format!(
        "UPDATE amulets SET energy = energy + $2, updated_at = NOW() WHERE id = $1 RETURNING {AMULET_COLUMNS}"
    );
    let amulet: AmuletRecord = sqlx::query_as(&update_sql)
        .bind(amulet.id)
        .bind(energy)
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO energy_logs (user_id, amulet_id, delta, reason) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(amulet.id)
    .bind(energy)
    .bind(EnergyReason::Checkin)
    .execute(&mut *conn)
    .await?;

    let mut balance = user.blessing_points;
    if points > 0 {
        let note = temple.as_ref().map(|t| t.name.as_str()).unwrap_or("每日签到");
        let change = PointChange::new(user_id, points, PointKind::Checkin)
            .reference("checkin", checkin.id)
            .note(note);
        balance = ledger::apply(&mut *conn, &change).await?;
    }

    let rewards_granted = {
        let mut store = PgRewardStore::new(&mut *conn);
        reward::grant_eligible_rewards(&mut store, user_id, cmd.temple_id, checkin.id, ctx.today)
            .await?
    };
    balance += rewards_granted.iter().map(|r| r.points_received).sum::<i64>();

    let mut all_dates = dates;
    all_dates.push(ctx.today);
    let current_streak = engine::current_streak(&all_dates, ctx.today);
    let milestone = engine::milestone_reached(previous_streak, current_streak);
    if let Some(days) = milestone {
        let n = NewNotification::new(
            NotificationType::CheckinMilestone,
            format!("连续签到 {days} 天"),
            format!("{}，您已连续签到 {days} 天，功德圆满！", user.name),
        )
        .related("checkin", checkin.id)
        .data(json!({ "streak": days }));
        notification::notify(&mut *conn, user_id, &n).await?;
    }

    info!(
        checkin_id = checkin.id,
        user_id = user_id,
        temple_id = ?cmd.temple_id,
        method = cmd.method.as_str(),
        points = points,
        rewards = rewards_granted.len(),
        "Check-in created"
    );

    Ok(CheckinOutcome {
        checkin,
        amulet,
        points_earned: points,
        rewards_granted,
        blessing_points: balance,
        current_streak,
        milestone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()
    }

    fn temple() -> TempleTarget {
        TempleTarget {
            id: 3,
            location: Some(GeoPoint {
                latitude: 25.0330,
                longitude: 121.5654,
            }),
            radius_meters: 100.0,
            nfc_uid: Some("04A2B3C4D5".to_string()),
        }
    }

    fn cmd(method: CheckinMethod) -> CheckinCommand {
        CheckinCommand {
            amulet_id: 1,
            temple_id: Some(3),
            method,
            ..Default::default()
        }
    }

    #[test]
    fn test_manual_without_temple() {
        let c = CheckinCommand {
            temple_id: None,
            ..cmd(CheckinMethod::Manual)
        };
        assert_eq!(verify_method(&c, None, "s", today()).unwrap(), None);
    }

    #[test]
    fn test_non_manual_requires_temple() {
        for method in [CheckinMethod::Gps, CheckinMethod::Nfc, CheckinMethod::QrCode] {
            let err = verify_method(&cmd(method), None, "s", today()).unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)));
        }
    }

    #[test]
    fn test_gps_requires_coordinates() {
        let err = verify_method(&cmd(CheckinMethod::Gps), Some(&temple()), "s", today()).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let no_coords = TempleTarget {
            location: None,
            ..temple()
        };
        let c = CheckinCommand {
            location: Some(GeoPoint::new(25.0330, 121.5654).unwrap()),
            ..cmd(CheckinMethod::Gps)
        };
        assert!(matches!(
            verify_method(&c, Some(&no_coords), "s", today()),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_gps_inside_and_outside_radius() {
        let inside = CheckinCommand {
            location: Some(GeoPoint::new(25.0334, 121.5654).unwrap()),
            ..cmd(CheckinMethod::Gps)
        };
        let distance = verify_method(&inside, Some(&temple()), "s", today())
            .unwrap()
            .unwrap();
        assert!(distance < 100.0);

        let outside = CheckinCommand {
            location: Some(GeoPoint::new(25.0478, 121.5170).unwrap()),
            ..cmd(CheckinMethod::Gps)
        };
        let err = verify_method(&outside, Some(&temple()), "s", today()).unwrap_err();
        assert!(matches!(err, ApiError::OutOfRange { distance_meters } if distance_meters > 1000.0));
    }

    #[test]
    fn test_manual_with_coordinates_still_geofenced() {
        let far = CheckinCommand {
            location: Some(GeoPoint::new(22.6273, 120.3014).unwrap()),
            ..cmd(CheckinMethod::Manual)
        };
        assert!(matches!(
            verify_method(&far, Some(&temple()), "s", today()),
            Err(ApiError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_nfc_uid_must_match() {
        let ok = CheckinCommand {
            nfc_uid: Some("04a2b3c4d5".to_string()),
            ..cmd(CheckinMethod::Nfc)
        };
        assert!(verify_method(&ok, Some(&temple()), "s", today()).is_ok());

        let wrong = CheckinCommand {
            nfc_uid: Some("FFFF".to_string()),
            ..cmd(CheckinMethod::Nfc)
        };
        assert!(verify_method(&wrong, Some(&temple()), "s", today()).is_err());
        assert!(verify_method(&cmd(CheckinMethod::Nfc), Some(&temple()), "s", today()).is_err());
    }

    #[test]
    fn test_qr_token_for_today_only() {
        let token = qr::checkin_token("secret", 3, today());
        let ok = CheckinCommand {
            qr_token: Some(token),
            ..cmd(CheckinMethod::QrCode)
        };
        assert!(verify_method(&ok, Some(&temple()), "secret", today()).is_ok());

        let tomorrow = today().succ_opt().unwrap();
        assert!(verify_method(&ok, Some(&temple()), "secret", tomorrow).is_err());
        assert!(verify_method(&ok, Some(&temple()), "other", today()).is_err());
    }
}
