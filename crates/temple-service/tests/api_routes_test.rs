//! 路由与中间件集成测试
//!
//! 使用延迟连接的连接池构建完整应用，只覆盖在查询数据库之前就会返回的路径：
//! CORS 预检、认证拒绝、账号类型拒绝与请求校验错误。
//! 通过账号类型检查的请求会读取账号状态，放在 `account_access_test` 中。

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use temple_service::{
    app::build_router,
    auth::{JwtConfig, JwtManager, TokenSubject},
    models::AccountType,
    state::AppState,
};
use temple_shared::{config::AppConfig, database::Database};
use tower::ServiceExt;

// ==================== 辅助函数 ====================

fn test_app() -> Router {
    let mut config = AppConfig::default();
    config.database.min_connections = 0;
    config.database.connect_timeout_seconds = 1;
    let db = Database::connect_lazy(&config.database).expect("lazy pool");

    let state = AppState::new(db.pool().clone(), config.auth.clone(), config.checkin.clone());
    build_router(state, &config)
}

fn token_for(account_type: AccountType, temple_id: Option<i64>, permissions: &[&str]) -> String {
    let manager = JwtManager::new(JwtConfig::default());
    let subject = TokenSubject {
        id: 42,
        name: "测试账号".to_string(),
        email: "tester@temple.tw".to_string(),
        account_type,
        temple_id,
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    };
    manager.generate_token(&subject).expect("token").0
}

fn public_token() -> String {
    token_for(AccountType::Public, None, &[])
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(req: Request<Body>) -> (StatusCode, Value) {
    let response = test_app().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ==================== 健康检查与全局中间件 ====================

#[tokio::test]
async fn test_health_is_public() {
    let (status, body) = send(request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let req = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-temple-001")
        .body(Body::empty())
        .unwrap();
    let response = test_app().oneshot(req).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-request-id"], "req-temple-001");
}

#[tokio::test]
async fn test_cors_preflight_skips_authentication() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/checkins")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type")
        .body(Body::empty())
        .unwrap();
    let response = test_app().oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
}

#[tokio::test]
async fn test_unauthorized_response_carries_cors_headers() {
    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/checkins")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = test_app().oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}

// ==================== 认证 ====================

#[tokio::test]
async fn test_member_route_requires_token() {
    let (status, body) = send(request(Method::GET, "/api/checkins", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let (status, body) = send(request(
        Method::GET,
        "/api/amulets",
        Some("not-a-real-token"),
        None,
    ))
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_personal_catalogue_paths_require_token() {
    for uri in [
        "/api/rewards/available",
        "/api/rewards/my-claims",
        "/api/leaderboard/my-rank",
        "/api/temples/1/my-checkins",
    ] {
        let (status, _) = send(request(Method::GET, uri, None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
}

// ==================== 账号类型 ====================

#[tokio::test]
async fn test_public_user_cannot_reach_admin_panel() {
    let token = public_token();
    let (status, body) = send(request(Method::GET, "/api/admin/users", Some(&token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    assert_eq!(body["message"], "仅限超级管理员使用");
}

#[tokio::test]
async fn test_public_user_cannot_reach_temple_panel() {
    let token = public_token();
    let (status, body) = send(request(
        Method::GET,
        "/api/temple-admin/my-temple",
        Some(&token),
        None,
    ))
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "仅限寺庙管理员使用");
}

#[tokio::test]
async fn test_temple_admin_cannot_check_in() {
    let token = token_for(AccountType::TempleAdmin, Some(1), &["manage_info"]);
    let (status, body) = send(request(
        Method::POST,
        "/api/checkins",
        Some(&token),
        Some(json!({ "amuletId": 1 })),
    ))
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "仅限一般用户使用");
}

// ==================== 请求校验 ====================

#[tokio::test]
async fn test_register_validation_error() {
    let (status, body) = send(request(
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "name": "王", "email": "not-an-email", "password": "123" })),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
