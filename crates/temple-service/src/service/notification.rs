//! 站内通知写入

use sqlx::PgExecutor;

use crate::error::Result;
use crate::models::NotificationType;

/// 待写入的通知
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    pub related_type: Option<&'static str>,
    pub related_id: Option<i64>,
    pub data: Option<serde_json::Value>,
}

impl NewNotification {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            title: title.into(),
            content: content.into(),
            related_type: None,
            related_id: None,
            data: None,
        }
    }

    pub fn related(mut self, related_type: &'static str, related_id: i64) -> Self {
        self.related_type = Some(related_type);
        self.related_id = Some(related_id);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// 给单个用户发送通知，返回通知 ID
pub async fn notify<'e>(
    executor: impl PgExecutor<'e>,
    user_id: i64,
    notification: &NewNotification,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO notifications (user_id, type, title, content, related_type, related_id, data)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(notification.notification_type)
    .bind(&notification.title)
    .bind(&notification.content)
    .bind(notification.related_type)
    .bind(notification.related_id)
    .bind(&notification.data)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 通知曾在该寺庙签到的所有有效用户，返回通知数
pub async fn notify_temple_visitors<'e>(
    executor: impl PgExecutor<'e>,
    temple_id: i64,
    notification: &NewNotification,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, type, title, content, related_type, related_id, data)
        SELECT u.id, $2, $3, $4, $5, $6, $7
        FROM public_users u
        WHERE u.is_active = TRUE
          AND EXISTS (SELECT 1 FROM checkins c WHERE c.user_id = u.id AND c.temple_id = $1)
        "#,
    )
    .bind(temple_id)
    .bind(notification.notification_type)
    .bind(&notification.title)
    .bind(&notification.content)
    .bind(notification.related_type)
    .bind(notification.related_id)
    .bind(&notification.data)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// 通知所有有效用户，返回通知数
pub async fn notify_all_users<'e>(
    executor: impl PgExecutor<'e>,
    notification: &NewNotification,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, type, title, content, related_type, related_id, data)
        SELECT id, $1, $2, $3, $4, $5, $6
        FROM public_users
        WHERE is_active = TRUE
        "#,
    )
    .bind(notification.notification_type)
    .bind(&notification.title)
    .bind(&notification.content)
    .bind(notification.related_type)
    .bind(notification.related_id)
    .bind(&notification.data)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
