//! 账号检查中间件
//!
//! 按路由组限制可访问的账号类型，并在每次请求时确认账号仍然有效

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;

use crate::auth::Claims;
use crate::models::AccountType;
use crate::service::account;
use crate::state::AppState;

/// 账号类型检查中间件工厂
///
/// # 示例
/// ```ignore
/// Router::new()
///     .route("/api/checkins", post(create_checkin))
///     .layer(axum::middleware::from_fn(require_account_type(&[AccountType::Public])))
/// ```
pub fn require_account_type(
    allowed: &'static [AccountType],
) -> impl Fn(Request<Body>, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone + Send
{
    move |request: Request<Body>, next: Next| {
        Box::pin(async move { check_account_type(request, next, allowed).await })
    }
}

async fn check_account_type(
    request: Request<Body>,
    next: Next,
    allowed: &[AccountType],
) -> Response {
    let account_type = match request.extensions().get::<Claims>() {
        Some(claims) => claims.account_type,
        None => return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "未认证"),
    };

    if allowed.contains(&account_type) {
        return next.run(request).await;
    }

    error_response(StatusCode::FORBIDDEN, "FORBIDDEN", forbidden_message(allowed))
}

/// 账号状态检查中间件
///
/// 停用或已删除的账号立即失效；寺庙管理员的寺庙与权限按数据库最新值覆盖 Claims，
/// 之后的 handler 读到的都是当前权限。
pub async fn require_live_account(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(claims) = request.extensions_mut().get_mut::<Claims>() else {
        return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "未认证");
    };

    match account::load_session(&state.pool, claims).await {
        Ok(session) => session.apply_to(claims),
        Err(err) => return err.into_response(),
    }

    next.run(request).await
}

fn forbidden_message(allowed: &[AccountType]) -> &'static str {
    match allowed {
        [AccountType::Public] => "仅限一般用户使用",
        [AccountType::SuperAdmin] => "仅限超级管理员使用",
        _ => "仅限寺庙管理员使用",
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "success": false,
        "code": code,
        "message": message,
        "data": null
    });

    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_message_by_group() {
        assert_eq!(forbidden_message(&[AccountType::Public]), "仅限一般用户使用");
        assert_eq!(forbidden_message(&[AccountType::SuperAdmin]), "仅限超级管理员使用");
        assert_eq!(
            forbidden_message(&[AccountType::TempleAdmin, AccountType::SuperAdmin]),
            "仅限寺庙管理员使用"
        );
    }
}
