//! 兑换订单流程
//!
//! 下单扣点减库存、取消退款回补库存、后台状态流转。锁顺序统一为
//! 用户行 → 商品行/订单行，避免并发取消时互相等待。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgConnection};
use temple_shared::observability::metrics;
use tracing::info;

use crate::error::{ApiError, Result};
use crate::models::{NotificationType, PointKind, RedemptionStatus};
use crate::service::ledger::{self, PointChange};
use crate::service::notification::{self, NewNotification};

/// 兑换订单（含商品名称）
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRecord {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_image_url: Option<String>,
    pub temple_id: Option<i64>,
    pub quantity: i32,
    pub merit_points_used: i64,
    pub status: RedemptionStatus,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub postal_code: Option<String>,
    pub city: String,
    pub district: String,
    pub address: String,
    pub shipping_method: Option<String>,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub admin_notes: Option<String>,
    pub redeemed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 订单查询的 SELECT 与 FROM 部分，别名 r 为订单、p 为商品
pub const REDEMPTION_SELECT: &str = r#"
    SELECT r.id, r.user_id, r.product_id, p.name AS product_name, p.image_url AS product_image_url,
           r.temple_id, r.quantity, r.merit_points_used, r.status, r.recipient_name,
           r.recipient_phone, r.postal_code, r.city, r.district, r.address, r.shipping_method,
           r.tracking_number, r.notes, r.admin_notes, r.redeemed_at, r.processed_at,
           r.shipped_at, r.completed_at, r.cancelled_at, r.updated_at
    FROM redemptions r
    JOIN products p ON p.id = r.product_id
"#;

/// 按 ID 读取订单
pub async fn fetch_redemption(conn: &mut PgConnection, id: i64) -> Result<RedemptionRecord> {
    let sql = format!("{REDEMPTION_SELECT} WHERE r.id = $1");
    sqlx::query_as::<_, RedemptionRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ApiError::RedemptionNotFound(id))
}

/// 下单请求
#[derive(Debug, Clone)]
pub struct RedeemCommand {
    pub product_id: i64,
    pub quantity: i32,
    pub address_id: i64,
    pub notes: Option<String>,
}

#[derive(Debug, FromRow)]
struct ProductForUpdate {
    id: i64,
    temple_id: Option<i64>,
    name: String,
    merit_points: i64,
    stock_quantity: i32,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct AddressSnapshot {
    user_id: i64,
    recipient_name: String,
    phone: String,
    postal_code: Option<String>,
    city: String,
    district: String,
    address: String,
}

/// 兑换商品，返回订单与剩余功德值
pub async fn create_redemption(
    conn: &mut PgConnection,
    user_id: i64,
    cmd: &RedeemCommand,
) -> Result<(RedemptionRecord, i64)> {
    let user = ledger::lock_user(conn, user_id).await?;

    let product: ProductForUpdate = sqlx::query_as(
        r#"
        SELECT id, temple_id, name, merit_points, stock_quantity, is_active
        FROM products
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(cmd.product_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ApiError::ProductNotFound(cmd.product_id))?;

    if !product.is_active {
        return Err(ApiError::BadRequest("商品已下架".to_string()));
    }
    if product.stock_quantity < cmd.quantity {
        return Err(ApiError::InsufficientStock);
    }

    let address: AddressSnapshot = sqlx::query_as(
        r#"
        SELECT user_id, recipient_name, phone, postal_code, city, district, address
        FROM addresses
        WHERE id = $1
        "#,
    )
    .bind(cmd.address_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ApiError::AddressNotFound(cmd.address_id))?;

    if address.user_id != user_id {
        return Err(ApiError::Forbidden("无权使用此地址".to_string()));
    }

    let total = product.merit_points * i64::from(cmd.quantity);
    if user.blessing_points < total {
        return Err(ApiError::InsufficientPoints {
            required: total,
            current: user.blessing_points,
        });
    }

    sqlx::query(
        "UPDATE products SET stock_quantity = stock_quantity - $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(product.id)
    .bind(cmd.quantity)
    .execute(&mut *conn)
    .await?;

    let redemption_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO redemptions
            (user_id, product_id, temple_id, quantity, merit_points_used, status,
             recipient_name, recipient_phone, postal_code, city, district, address, notes)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9, $10, $11, $12)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(product.id)
    .bind(product.temple_id)
    .bind(cmd.quantity)
    .bind(total)
    .bind(&address.recipient_name)
    .bind(&address.phone)
    .bind(&address.postal_code)
    .bind(&address.city)
    .bind(&address.district)
    .bind(&address.address)
    .bind(cmd.notes.as_deref())
    .fetch_one(&mut *conn)
    .await?;

    let change = PointChange::new(user_id, -total, PointKind::Redemption)
        .reference("redemption", redemption_id)
        .note(&product.name);
    let remaining = ledger::apply(&mut *conn, &change).await?;

    let n = NewNotification::new(
        NotificationType::RedemptionStatus,
        "兑换成功",
        format!(
            "您已使用 {} 点功德值兑换「{}」x{}，订单处理中",
            total, product.name, cmd.quantity
        ),
    )
    .related("redemption", redemption_id)
    .data(json!({ "status": RedemptionStatus::Pending }));
    notification::notify(&mut *conn, user_id, &n).await?;

    metrics::record_redemption(RedemptionStatus::Pending.as_str());
    info!(
        redemption_id = redemption_id,
        user_id = user_id,
        product_id = product.id,
        points = total,
        "Redemption created"
    );

    let record = fetch_redemption(conn, redemption_id).await?;
    Ok((record, remaining))
}

#[derive(Debug, FromRow)]
struct RedemptionLock {
    id: i64,
    user_id: i64,
    product_id: i64,
    temple_id: Option<i64>,
    quantity: i32,
    merit_points_used: i64,
    status: RedemptionStatus,
}

async fn lock_redemption(conn: &mut PgConnection, id: i64) -> Result<RedemptionLock> {
    sqlx::query_as(
        r#"
        SELECT id, user_id, product_id, temple_id, quantity, merit_points_used, status
        FROM redemptions
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ApiError::RedemptionNotFound(id))
}

/// 用户取消订单，仅限待处理状态
pub async fn cancel_by_user(
    conn: &mut PgConnection,
    user_id: i64,
    redemption_id: i64,
) -> Result<(RedemptionRecord, i64)> {
    ledger::lock_user(conn, user_id).await?;
    let order = lock_redemption(conn, redemption_id).await?;

    if order.user_id != user_id {
        return Err(ApiError::Forbidden("无权操作此订单".to_string()));
    }
    if order.status != RedemptionStatus::Pending {
        return Err(ApiError::BadRequest("只有待处理的订单可以取消".to_string()));
    }

    let balance = refund_and_restock(conn, &order).await?;
    set_status(conn, order.id, RedemptionStatus::Cancelled, &StatusUpdate::default()).await?;
    notify_status(conn, &order, RedemptionStatus::Cancelled).await?;
    metrics::record_redemption(RedemptionStatus::Cancelled.as_str());
    info!(redemption_id = order.id, user_id = user_id, "Redemption cancelled by user");

    let record = fetch_redemption(conn, order.id).await?;
    Ok((record, balance))
}

/// 后台更新订单
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: Option<RedemptionStatus>,
    pub tracking_number: Option<String>,
    pub shipping_method: Option<String>,
    pub admin_notes: Option<String>,
}

/// 后台更新订单状态与物流信息
///
/// `temple_scope` 为寺庙管理员所属寺庙，订单须属于该寺庙。
pub async fn update_by_admin(
    conn: &mut PgConnection,
    redemption_id: i64,
    update: &StatusUpdate,
    temple_scope: Option<i64>,
) -> Result<RedemptionRecord> {
    let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM redemptions WHERE id = $1")
        .bind(redemption_id)
        .fetch_optional(&mut *conn)
        .await?;
    let owner = owner.ok_or(ApiError::RedemptionNotFound(redemption_id))?;

    // 取消会退款，先锁用户再锁订单
    sqlx::query("SELECT id FROM public_users WHERE id = $1 FOR UPDATE")
        .bind(owner)
        .execute(&mut *conn)
        .await?;
    let order = lock_redemption(conn, redemption_id).await?;

    if let Some(temple_id) = temple_scope {
        if order.temple_id != Some(temple_id) {
            return Err(ApiError::Forbidden("此订单不属于您的寺庙".to_string()));
        }
    }

    let next = update.status.filter(|s| *s != order.status);
    if let Some(next) = next {
        if !order.status.can_transition_to(next) {
            return Err(ApiError::InvalidStatusTransition {
                from: order.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if next == RedemptionStatus::Cancelled {
            refund_and_restock(conn, &order).await?;
        }
    }

    set_status(conn, order.id, next.unwrap_or(order.status), update).await?;

    if let Some(next) = next {
        notify_status(conn, &order, next).await?;
        metrics::record_redemption(next.as_str());
        info!(
            redemption_id = order.id,
            from = order.status.as_str(),
            to = next.as_str(),
            "Redemption status changed"
        );
    }

    fetch_redemption(conn, order.id).await
}

async fn refund_and_restock(conn: &mut PgConnection, order: &RedemptionLock) -> Result<i64> {
    sqlx::query(
        "UPDATE products SET stock_quantity = stock_quantity + $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(order.product_id)
    .bind(order.quantity)
    .execute(&mut *conn)
    .await?;

    let change = PointChange::new(order.user_id, order.merit_points_used, PointKind::Refund)
        .reference("redemption", order.id)
        .note("订单取消退还");
    ledger::apply(conn, &change).await
}

async fn set_status(
    conn: &mut PgConnection,
    id: i64,
    status: RedemptionStatus,
    update: &StatusUpdate,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE redemptions SET
            status = $2,
            processed_at = CASE WHEN $2 = 'processing' THEN COALESCE(processed_at, NOW()) ELSE processed_at END,
            shipped_at = CASE WHEN $2 = 'shipped' THEN COALESCE(shipped_at, NOW()) ELSE shipped_at END,
            completed_at = CASE WHEN $2 = 'completed' THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
            cancelled_at = CASE WHEN $2 = 'cancelled' THEN COALESCE(cancelled_at, NOW()) ELSE cancelled_at END,
            tracking_number = COALESCE($3, tracking_number),
            shipping_method = COALESCE($4, shipping_method),
            admin_notes = COALESCE($5, admin_notes),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(update.tracking_number.as_deref())
    .bind(update.shipping_method.as_deref())
    .bind(update.admin_notes.as_deref())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn notify_status(
    conn: &mut PgConnection,
    order: &RedemptionLock,
    status: RedemptionStatus,
) -> Result<()> {
    let n = NewNotification::new(
        NotificationType::RedemptionStatus,
        "订单状态更新",
        format!("您的兑换订单 #{} 状态已更新为：{}", order.id, status.label()),
    )
    .related("redemption", order.id)
    .data(json!({ "status": status }));
    notification::notify(&mut *conn, order.user_id, &n).await?;
    Ok(())
}
