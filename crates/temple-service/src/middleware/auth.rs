//! JWT 认证中间件
//!
//! 验证请求中的 Bearer Token 并将 Claims 注入请求扩展

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::state::AppState;

/// 无需认证的路径
const PUBLIC_PATHS: [&str; 6] = [
    "/health",
    "/ready",
    "/api/auth/login",
    "/api/auth/register",
    "/api/temple-admin/auth/login",
    "/api/admin/auth/login",
];

/// 认证中间件
///
/// 公开路由跳过验证；公开目录的 GET 请求在携带有效 Token 时仍会注入 Claims，
/// 便于按登录状态补充信息。
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if PUBLIC_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_owned);

    if is_public_catalogue(request.method(), path) {
        if let Some(claims) = token.and_then(|t| state.jwt_manager.verify_token(&t).ok()) {
            request.extensions_mut().insert(claims);
        }
        return next.run(request).await;
    }

    let Some(token) = token else {
        return unauthorized_response("缺少认证 Token");
    };

    match state.jwt_manager.verify_token(&token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => unauthorized_response(&e.to_string()),
    }
}

/// 公开目录：寺庙、商品、奖励、公告、活动与排行榜的只读接口
///
/// 个人数据子路由（`my-checkins`、`available`、`my-claims`、`my-rank`）仍需登录。
fn is_public_catalogue(method: &Method, path: &str) -> bool {
    if method != Method::GET {
        return false;
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["api", "temples", ..] => !segments.contains(&"my-checkins"),
        ["api", "products", ..] => true,
        ["api", "rewards"] => true,
        ["api", "rewards", id] => id.chars().all(|c| c.is_ascii_digit()),
        ["api", "announcements", _] => true,
        ["api", "events", _] => true,
        ["api", "leaderboard", board] => *board != "my-rank",
        _ => false,
    }
}

/// 生成 401 未授权响应
fn unauthorized_response(message: &str) -> Response {
    let body = json!({
        "success": false,
        "code": "UNAUTHORIZED",
        "message": message,
        "data": null
    });

    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}
