//! 数据库集成测试共用的辅助函数
//!
//! 需要 `TEMPLE_TEST_DATABASE_URL` 指向一个可写的 PostgreSQL 测试库。

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use fake::Fake;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sqlx::PgPool;
use temple_service::{app::build_router, auth::hash_password, state::AppState};
use temple_shared::config::AppConfig;
use tower::ServiceExt;

pub const TEST_PASSWORD: &str = "blessing-123";

pub async fn setup() -> (Router, PgPool) {
    let url = std::env::var("TEMPLE_TEST_DATABASE_URL")
        .expect("TEMPLE_TEST_DATABASE_URL must be set for flow tests");
    let pool = PgPool::connect(&url).await.expect("数据库连接失败");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("迁移执行失败");

    let config = AppConfig::default();
    let state = AppState::new(pool.clone(), config.auth.clone(), config.checkin.clone());
    (build_router(state, &config), pool)
}

pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// 不解析 JSON 的 GET，返回状态、Content-Type 与原始内容
pub async fn get_text(app: &Router, uri: &str, token: &str) -> (StatusCode, String, String) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

/// 不会与已有账号冲突的 Email
pub fn unique_email() -> String {
    let suffix: u32 = (100_000..999_999).fake();
    let email: String = SafeEmail().fake();
    format!("{suffix}.{email}")
}

/// 注册一个新用户，返回 (token, user_id)
pub async fn register(app: &Router) -> (String, i64) {
    let name: String = Name().fake();

    let (status, body) = call(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "name": name,
            "email": unique_email(),
            "password": TEST_PASSWORD
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let token = body["data"]["token"].as_str().unwrap().to_string();
    let user_id = body["data"]["user"]["id"].as_i64().unwrap();
    (token, user_id)
}

pub async fn balance(app: &Router, token: &str) -> i64 {
    let (status, body) = call(app, Method::GET, "/api/users/profile", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["blessingPoints"].as_i64().unwrap()
}

pub async fn set_balance(pool: &PgPool, user_id: i64, points: i64) {
    sqlx::query("UPDATE public_users SET blessing_points = $1 WHERE id = $2")
        .bind(points)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_temple(pool: &PgPool) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO temples (name, address, latitude, longitude, checkin_merit_points)
        VALUES ('测试宫', '台南市中西区永福路二段', 22.9971, 120.2025, 10)
        RETURNING id
        "#,
    )
    .fetch_one(pool)
    .await
    .expect("插入测试寺庙失败")
}

pub async fn seed_product(pool: &PgPool, merit_points: i64, stock: i32) -> i64 {
    seed_temple_product(pool, None, merit_points, stock).await
}

pub async fn seed_temple_product(
    pool: &PgPool,
    temple_id: Option<i64>,
    merit_points: i64,
    stock: i32,
) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO products (temple_id, name, category, merit_points, stock_quantity)
        VALUES ($1, '流程测试平安符', 'amulet', $2, $3)
        RETURNING id
        "#,
    )
    .bind(temple_id)
    .bind(merit_points)
    .bind(stock)
    .fetch_one(pool)
    .await
    .expect("插入测试商品失败")
}

/// 建立寺庙管理员并登录，返回 (token, admin_id)
pub async fn temple_admin(
    app: &Router,
    pool: &PgPool,
    temple_id: i64,
    role: &str,
    permissions: Option<Value>,
) -> (String, i64) {
    let email = unique_email();
    let admin_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO temple_admin_users (temple_id, name, email, password_hash, role, permissions)
        VALUES ($1, '测试管理员', $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(temple_id)
    .bind(&email)
    .bind(hash_password(TEST_PASSWORD).unwrap())
    .bind(role)
    .bind(permissions)
    .fetch_one(pool)
    .await
    .expect("插入寺庙管理员失败");

    let (status, body) = call(
        app,
        Method::POST,
        "/api/temple-admin/auth/login",
        None,
        Some(json!({ "email": email, "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (body["data"]["token"].as_str().unwrap().to_string(), admin_id)
}

/// 建立超级管理员并登录，返回 token
pub async fn super_admin(app: &Router, pool: &PgPool) -> String {
    let email = unique_email();
    sqlx::query(
        "INSERT INTO super_admin_users (name, email, password_hash) VALUES ('测试总管理员', $1, $2)",
    )
    .bind(&email)
    .bind(hash_password(TEST_PASSWORD).unwrap())
    .execute(pool)
    .await
    .expect("插入超级管理员失败");

    let (status, body) = call(
        app,
        Method::POST,
        "/api/admin/auth/login",
        None,
        Some(json!({ "email": email, "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["token"].as_str().unwrap().to_string()
}

/// 新增一个收件地址，返回地址 ID
pub async fn add_address(app: &Router, token: &str) -> i64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/addresses",
        Some(token),
        Some(json!({
            "recipientName": "林信众",
            "phone": "0912-345-678",
            "city": "台南市",
            "district": "中西区",
            "address": "永福路二段 227 巷 18 号"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_i64().unwrap()
}

/// 新增一个护身符，返回护身符 ID
pub async fn create_amulet(app: &Router, token: &str, name: &str) -> i64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/amulets",
        Some(token),
        Some(json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_i64().unwrap()
}

/// 直接写入一笔寺庙签到，`days_ago` 为距今天数
pub async fn seed_temple_checkin(pool: &PgPool, user_id: i64, temple_id: i64, days_ago: i32) {
    sqlx::query(
        r#"
        INSERT INTO checkins (user_id, temple_id, method, blessing_points, checkin_date, created_at)
        VALUES ($1, $2, 'gps', 10, CURRENT_DATE - $3, NOW() - make_interval(days => $3))
        "#,
    )
    .bind(user_id)
    .bind(temple_id)
    .bind(days_ago)
    .execute(pool)
    .await
    .expect("插入测试签到失败");
}
