//! 服务错误类型定义
//!
//! 所有错误最终转换为 `{success:false, code, message, data:null}` 响应。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use temple_shared::error::SharedError;

/// 服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // 认证错误
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("禁止访问: {0}")]
    Forbidden(String),
    #[error("Email 或密码错误")]
    InvalidCredentials,
    #[error("账号已被停用")]
    AccountDisabled,
    #[error("账号已被锁定，请稍后重试")]
    AccountLocked,
    #[error("该 Email 已被注册")]
    EmailTaken,

    // 验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error("{0}")]
    BadRequest(String),

    // 资源不存在
    #[error("寺庙不存在: {0}")]
    TempleNotFound(i64),
    #[error("护身符不存在: {0}")]
    AmuletNotFound(i64),
    #[error("商品不存在: {0}")]
    ProductNotFound(i64),
    #[error("奖励不存在: {0}")]
    RewardNotFound(i64),
    #[error("订单不存在: {0}")]
    RedemptionNotFound(i64),
    #[error("地址不存在: {0}")]
    AddressNotFound(i64),
    #[error("用户不存在: {0}")]
    UserNotFound(i64),
    #[error("资源不存在: {0}")]
    NotFound(String),

    // 签到
    #[error("今天已经签到过了")]
    AlreadyCheckedIn,
    #[error("今日已在此寺庙签到")]
    AlreadyCheckedInTemple,
    #[error("距离寺庙太远（{distance_meters:.0} 公尺），无法签到")]
    OutOfRange { distance_meters: f64 },

    // 功德值与兑换
    #[error("功德值不足，需要 {required} 点，目前有 {current} 点")]
    InsufficientPoints { required: i64, current: i64 },
    #[error("库存不足")]
    InsufficientStock,
    #[error("能量不足，目前有 {current} 点")]
    InsufficientEnergy { current: i32 },
    #[error("无效的订单状态变更: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    // 奖励
    #[error("您已经领取过此奖励")]
    RewardAlreadyClaimed,
    #[error("未达成领取条件")]
    RewardNotEligible,

    // 系统错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::AccountDisabled | Self::AccountLocked => {
                StatusCode::FORBIDDEN
            }

            Self::EmailTaken
            | Self::Validation(_)
            | Self::BadRequest(_)
            | Self::AlreadyCheckedIn
            | Self::AlreadyCheckedInTemple
            | Self::OutOfRange { .. }
            | Self::InsufficientPoints { .. }
            | Self::InsufficientEnergy { .. }
            | Self::InvalidStatusTransition { .. }
            | Self::RewardAlreadyClaimed
            | Self::RewardNotEligible => StatusCode::BAD_REQUEST,

            Self::TempleNotFound(_)
            | Self::AmuletNotFound(_)
            | Self::ProductNotFound(_)
            | Self::RewardNotFound(_)
            | Self::RedemptionNotFound(_)
            | Self::AddressNotFound(_)
            | Self::UserNotFound(_)
            | Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::InsufficientStock => StatusCode::CONFLICT,

            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountDisabled => "ACCOUNT_DISABLED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::TempleNotFound(_) => "TEMPLE_NOT_FOUND",
            Self::AmuletNotFound(_) => "AMULET_NOT_FOUND",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::RedemptionNotFound(_) => "REDEMPTION_NOT_FOUND",
            Self::AddressNotFound(_) => "ADDRESS_NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyCheckedIn => "ALREADY_CHECKED_IN",
            Self::AlreadyCheckedInTemple => "ALREADY_CHECKED_IN_TEMPLE",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::InsufficientStock => "INSUFFICIENT_STOCK",
            Self::InsufficientEnergy { .. } => "INSUFFICIENT_ENERGY",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::RewardAlreadyClaimed => "REWARD_ALREADY_CLAIMED",
            Self::RewardNotEligible => "REWARD_NOT_ELIGIBLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {}", err))
    }
}

impl From<SharedError> for ApiError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Database(e) => Self::Database(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// 判断是否违反了指定名称的唯一约束
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505") && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn all_error_variants() -> Vec<(ApiError, StatusCode, &'static str)> {
        vec![
            (ApiError::Unauthorized("token expired".into()), StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            (ApiError::Forbidden("temple scope".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (ApiError::InvalidCredentials, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            (ApiError::AccountDisabled, StatusCode::FORBIDDEN, "ACCOUNT_DISABLED"),
            (ApiError::AccountLocked, StatusCode::FORBIDDEN, "ACCOUNT_LOCKED"),
            (ApiError::EmailTaken, StatusCode::BAD_REQUEST, "EMAIL_TAKEN"),
            (ApiError::Validation("email".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (ApiError::BadRequest("此寺庙暂不开放签到".into()), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (ApiError::TempleNotFound(1), StatusCode::NOT_FOUND, "TEMPLE_NOT_FOUND"),
            (ApiError::AmuletNotFound(2), StatusCode::NOT_FOUND, "AMULET_NOT_FOUND"),
            (ApiError::ProductNotFound(3), StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND"),
            (ApiError::RewardNotFound(4), StatusCode::NOT_FOUND, "REWARD_NOT_FOUND"),
            (ApiError::RedemptionNotFound(5), StatusCode::NOT_FOUND, "REDEMPTION_NOT_FOUND"),
            (ApiError::AddressNotFound(6), StatusCode::NOT_FOUND, "ADDRESS_NOT_FOUND"),
            (ApiError::UserNotFound(7), StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            (ApiError::NotFound("公告".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (ApiError::AlreadyCheckedIn, StatusCode::BAD_REQUEST, "ALREADY_CHECKED_IN"),
            (ApiError::AlreadyCheckedInTemple, StatusCode::BAD_REQUEST, "ALREADY_CHECKED_IN_TEMPLE"),
            (ApiError::OutOfRange { distance_meters: 1520.4 }, StatusCode::BAD_REQUEST, "OUT_OF_RANGE"),
            (ApiError::InsufficientPoints { required: 300, current: 20 }, StatusCode::BAD_REQUEST, "INSUFFICIENT_POINTS"),
            (ApiError::InsufficientStock, StatusCode::CONFLICT, "INSUFFICIENT_STOCK"),
            (ApiError::InsufficientEnergy { current: 3 }, StatusCode::BAD_REQUEST, "INSUFFICIENT_ENERGY"),
            (
                ApiError::InvalidStatusTransition { from: "shipped".into(), to: "pending".into() },
                StatusCode::BAD_REQUEST,
                "INVALID_STATUS_TRANSITION",
            ),
            (ApiError::RewardAlreadyClaimed, StatusCode::BAD_REQUEST, "REWARD_ALREADY_CLAIMED"),
            (ApiError::RewardNotEligible, StatusCode::BAD_REQUEST, "REWARD_NOT_ELIGIBLE"),
            (ApiError::Internal("unexpected state".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        ]
    }

    #[test]
    fn test_all_variants_status_and_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            assert_eq!(error.status_code(), expected_status, "状态码不匹配: {expected_code}");
            assert_eq!(error.error_code(), expected_code);
        }
    }

    #[test]
    fn test_display_carries_context() {
        let msg = ApiError::InsufficientPoints { required: 300, current: 20 }.to_string();
        assert_eq!(msg, "功德值不足，需要 300 点，目前有 20 点");

        let msg = ApiError::OutOfRange { distance_meters: 1520.4 }.to_string();
        assert_eq!(msg, "距离寺庙太远（1520 公尺），无法签到");

        assert!(ApiError::TempleNotFound(42).to_string().contains("42"));
    }

    #[tokio::test]
    async fn test_into_response_body_structure() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let response = error.into_response();
            assert_eq!(response.status(), expected_status);

            let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("读取响应体失败");
            let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

            assert_eq!(body["success"], json!(false));
            assert_eq!(body["code"], json!(expected_code));
            assert!(!body["message"].as_str().unwrap_or("").is_empty());
            assert!(body["data"].is_null());
        }
    }

    #[tokio::test]
    async fn test_system_errors_hide_internal_details() {
        let errors = vec![
            ApiError::Internal("stack overflow at module X".into()),
            ApiError::Database(sqlx::Error::PoolTimedOut),
        ];

        for error in errors {
            let response = error.into_response();
            let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
            let message = body["message"].as_str().unwrap();
            assert_eq!(message, "服务内部错误，请稍后重试");
        }
    }

    #[test]
    fn test_from_validation_errors() {
        use validator::{ValidationError, ValidationErrors};

        let mut errors = ValidationErrors::new();
        errors.add("email", ValidationError::new("email"));

        let err: ApiError = errors.into();
        assert!(matches!(&err, ApiError::Validation(msg) if msg.contains("email")));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_from_shared_error() {
        let err: ApiError = SharedError::Database(sqlx::Error::RowNotFound).into();
        assert!(matches!(err, ApiError::Database(_)));

        let err: ApiError = SharedError::Internal("boom".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn test_unique_violation_ignores_other_errors() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound, "uq_checkins_amulet_day"));
    }
}
