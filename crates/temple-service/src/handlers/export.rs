//! 寺庙后台 CSV 导出
//!
//! UTF-8 带 BOM，方便 Excel 直接开启。时间以 UTC 输出。

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::FromRow;
use tracing::info;

use super::insight::{REVENUE_STATUSES, report_range};
use crate::auth::{AuthUser, TempleScope};
use crate::dto::end_of_day_exclusive;
use crate::error::Result;
use crate::models::{CheckinMethod, RedemptionStatus, TemplePermission};
use crate::state::AppState;

const EXPORT_DEFAULT_DAYS: i64 = 30;

/// 逐行组装 CSV
#[derive(Debug)]
pub struct CsvWriter {
    buf: String,
}

impl CsvWriter {
    pub fn new(header: &[&str]) -> Self {
        let mut writer = Self {
            buf: String::from('\u{feff}'),
        };
        writer.row(header.iter().copied());
        writer
    }

    pub fn row<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            push_field(&mut self.buf, field.as_ref());
        }
        self.buf.push_str("\r\n");
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn push_field(buf: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        buf.push('"');
        buf.push_str(&field.replace('"', "\"\""));
        buf.push('"');
    } else {
        buf.push_str(field);
    }
}

fn csv_response(filename: String, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<RedemptionStatus>,
}

impl ExportQuery {
    fn range(&self) -> Result<(NaiveDate, NaiveDate)> {
        report_range(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            EXPORT_DEFAULT_DAYS,
            Utc::now().date_naive(),
        )
    }
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[derive(Debug, FromRow)]
struct CheckinExportRow {
    created_at: DateTime<Utc>,
    user_name: String,
    email: String,
    method: CheckinMethod,
    blessing_points: i64,
}

#[derive(Debug, FromRow)]
struct OrderExportRow {
    id: i64,
    redeemed_at: DateTime<Utc>,
    user_name: String,
    product_name: String,
    quantity: i32,
    merit_points_used: i64,
    status: RedemptionStatus,
    recipient_name: String,
    recipient_phone: String,
    city: String,
    district: String,
    address: String,
}

#[derive(Debug, FromRow)]
struct RevenueExportRow {
    date: NaiveDate,
    orders: i64,
    revenue: i64,
}

/// 签到纪录导出
///
/// GET /api/temple-admin/temples/{id}/export/checkins
pub async fn export_checkins(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    let (start, end) = query.range()?;

    let rows: Vec<CheckinExportRow> = sqlx::query_as(
        r#"
        SELECT c.created_at, u.name AS user_name, u.email, c.method, c.blessing_points
        FROM checkins c
        JOIN public_users u ON u.id = c.user_id
        WHERE c.temple_id = $1 AND c.created_at >= $2 AND c.created_at < $3
        ORDER BY c.created_at DESC
        "#,
    )
    .bind(temple_id)
    .bind(start_of(start))
    .bind(end_of_day_exclusive(end))
    .fetch_all(&state.pool)
    .await?;

    let mut csv = CsvWriter::new(&[
        "日期", "时间", "信众", "Email", "签到方式", "功德值",
    ]);
    for row in &rows {
        csv.row([
            row.created_at.format("%Y-%m-%d").to_string(),
            row.created_at.format("%H:%M:%S").to_string(),
            row.user_name.clone(),
            row.email.clone(),
            row.method.as_str().to_string(),
            row.blessing_points.to_string(),
        ]);
    }

    info!(temple_id = temple_id, rows = rows.len(), "Checkins exported");
    Ok(csv_response(
        format!("checkins_{temple_id}_{start}_{end}.csv"),
        csv.finish(),
    ))
}

/// 订单导出
///
/// GET /api/temple-admin/temples/{id}/export/orders
pub async fn export_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    let (start, end) = query.range()?;

    let rows: Vec<OrderExportRow> = sqlx::query_as(
        r#"
        SELECT r.id, r.redeemed_at, u.name AS user_name, p.name AS product_name, r.quantity,
               r.merit_points_used, r.status, r.recipient_name, r.recipient_phone,
               r.city, r.district, r.address
        FROM redemptions r
        JOIN public_users u ON u.id = r.user_id
        JOIN products p ON p.id = r.product_id
        WHERE r.temple_id = $1 AND r.redeemed_at >= $2 AND r.redeemed_at < $3
          AND ($4::VARCHAR IS NULL OR r.status = $4)
        ORDER BY r.redeemed_at DESC
        "#,
    )
    .bind(temple_id)
    .bind(start_of(start))
    .bind(end_of_day_exclusive(end))
    .bind(query.status)
    .fetch_all(&state.pool)
    .await?;

    let mut csv = CsvWriter::new(&[
        "订单编号", "时间", "会员", "商品", "数量", "功德值", "状态", "收件人", "电话", "地址",
    ]);
    for row in &rows {
        csv.row([
            row.id.to_string(),
            row.redeemed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            row.user_name.clone(),
            row.product_name.clone(),
            row.quantity.to_string(),
            row.merit_points_used.to_string(),
            row.status.label().to_string(),
            row.recipient_name.clone(),
            row.recipient_phone.clone(),
            format!("{}{}{}", row.city, row.district, row.address),
        ]);
    }

    info!(temple_id = temple_id, rows = rows.len(), "Orders exported");
    Ok(csv_response(
        format!("orders_{temple_id}_{start}_{end}.csv"),
        csv.finish(),
    ))
}

/// 每日收入导出，末行为总计
///
/// GET /api/temple-admin/temples/{id}/export/revenue
pub async fn export_revenue(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    let (start, end) = query.range()?;

    let rows: Vec<RevenueExportRow> = sqlx::query_as(&format!(
        r#"
        SELECT d::DATE AS date, COUNT(r.id) AS orders,
               COALESCE(SUM(r.merit_points_used), 0)::BIGINT AS revenue
        FROM generate_series($2::DATE, $3::DATE, INTERVAL '1 day') AS d
        LEFT JOIN redemptions r
               ON r.temple_id = $1
              AND (r.redeemed_at AT TIME ZONE 'UTC')::DATE = d::DATE
              AND r.status IN {REVENUE_STATUSES}
        GROUP BY d
        ORDER BY d
        "#
    ))
    .bind(temple_id)
    .bind(start)
    .bind(end)
    .fetch_all(&state.pool)
    .await?;

    let mut csv = CsvWriter::new(&["日期", "订单数", "功德值收入"]);
    for row in &rows {
        csv.row([
            row.date.to_string(),
            row.orders.to_string(),
            row.revenue.to_string(),
        ]);
    }
    let orders: i64 = rows.iter().map(|r| r.orders).sum();
    let revenue: i64 = rows.iter().map(|r| r.revenue).sum();
    csv.row(["总计".to_string(), orders.to_string(), revenue.to_string()]);

    info!(temple_id = temple_id, days = rows.len(), "Revenue exported");
    Ok(csv_response(
        format!("revenue_{temple_id}_{start}_{end}.csv"),
        csv.finish(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_starts_with_bom() {
        let csv = CsvWriter::new(&["日期", "功德值"]).finish();
        assert!(csv.starts_with('\u{feff}'));
        assert!(csv.ends_with("日期,功德值\r\n"));
    }

    #[test]
    fn test_csv_quotes_special_fields() {
        let mut csv = CsvWriter::new(&["a"]);
        csv.row(["台南市,中西区", "他说\"平安\"", "第一行\n第二行", "plain"]);
        let body = csv.finish();
        assert!(body.ends_with(
            "\"台南市,中西区\",\"他说\"\"平安\"\"\",\"第一行\n第二行\",plain\r\n"
        ));
    }

    #[test]
    fn test_export_query_status() {
        let query: ExportQuery = serde_json::from_str(r#"{"status":"shipped"}"#).unwrap();
        assert_eq!(query.status, Some(RedemptionStatus::Shipped));
        assert!(query.range().is_ok());
    }
}
