//! 审计日志中间件
//!
//! 记录已认证账号成功的写操作（POST/PUT/PATCH/DELETE）到 system_logs 表。

use axum::{
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use tracing::{debug, error};

use crate::auth::Claims;
use crate::state::AppState;

/// 一条待写入的审计记录
#[derive(Debug, Clone, PartialEq)]
struct AuditEntry {
    actor_type: &'static str,
    actor_id: i64,
    actor_name: String,
    module: String,
    action: &'static str,
    target_type: Option<String>,
    target_id: Option<String>,
    request_method: String,
    request_path: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

/// 审计中间件：写操作成功后异步写入日志，写入失败不影响业务响应
pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();

    if !is_write_method(&method) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();

    // 登录、注册与刷新 Token 不属于业务操作
    if path.contains("/auth/") {
        return next.run(request).await;
    }

    let claims = request.extensions().get::<Claims>().cloned();
    let ip_address = extract_client_ip(&request);
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let response = next.run(request).await;

    if !response.status().is_success() {
        return response;
    }
    let Some(claims) = claims else {
        return response;
    };
    let Ok(actor_id) = claims.user_id() else {
        return response;
    };

    let (module, action) = parse_module_action(&path, &method);
    let (target_type, target_id) = extract_target(&path);
    let entry = AuditEntry {
        actor_type: claims.account_type.as_str(),
        actor_id,
        actor_name: claims.name,
        module,
        action,
        target_type,
        target_id,
        request_method: method.to_string(),
        request_path: path,
        ip_address,
        user_agent,
    };

    let pool = state.pool.clone();
    tokio::spawn(async move {
        write_audit_log(&pool, &entry).await;
    });

    response
}

fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// 去掉路由组前缀后的路径段
///
/// 寺庙后台的 `/temples/{id}/{resource}` 以子资源为准。
fn resource_segments(path: &str) -> Vec<&str> {
    let stripped = ["/api/admin/", "/api/temple-admin/", "/api/"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .unwrap_or(path);
    let segments: Vec<&str> = stripped.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["temples", id, _, ..] if is_numeric(id) => segments[2..].to_vec(),
        _ => segments,
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// 从路径中解析业务模块，HTTP 方法映射为操作动词
fn parse_module_action(path: &str, method: &Method) -> (String, &'static str) {
    let segments = resource_segments(path);
    let module = segments.first().copied().unwrap_or("unknown").to_string();
    let action = match *method {
        Method::POST => "create",
        Method::PUT | Method::PATCH => "update",
        Method::DELETE => "delete",
        _ => "unknown",
    };
    (module, action)
}

/// 从路径中提取操作目标，仅当第二段为纯数字时视为资源 ID
fn extract_target(path: &str) -> (Option<String>, Option<String>) {
    let segments = resource_segments(path);
    if segments.len() >= 2 && is_numeric(segments[1]) {
        let target_type = segments[0].strip_suffix('s').unwrap_or(segments[0]);
        return (Some(target_type.to_string()), Some(segments[1].to_string()));
    }
    (None, None)
}

/// 优先取反向代理设置的 X-Forwarded-For 第一段
fn extract_client_ip(request: &Request<axum::body::Body>) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
}

async fn write_audit_log(pool: &PgPool, entry: &AuditEntry) {
    let result = sqlx::query(
        r#"
        INSERT INTO system_logs
            (actor_type, actor_id, actor_name, module, action, target_type, target_id,
             request_method, request_path, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.actor_type)
    .bind(entry.actor_id)
    .bind(&entry.actor_name)
    .bind(&entry.module)
    .bind(entry.action)
    .bind(&entry.target_type)
    .bind(&entry.target_id)
    .bind(&entry.request_method)
    .bind(&entry.request_path)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .execute(pool)
    .await;

    match result {
        Ok(_) => debug!(
            actor_type = entry.actor_type,
            actor_id = entry.actor_id,
            module = %entry.module,
            action = entry.action,
            "Audit log recorded"
        ),
        Err(e) => error!(
            error = %e,
            actor_id = entry.actor_id,
            module = %entry.module,
            "Failed to write audit log"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_parse_module_action() {
        let (module, action) = parse_module_action("/api/admin/temples", &Method::POST);
        assert_eq!(module, "temples");
        assert_eq!(action, "create");

        let (module, action) = parse_module_action("/api/admin/users/5/points", &Method::PUT);
        assert_eq!(module, "users");
        assert_eq!(action, "update");

        let (module, action) = parse_module_action("/api/addresses/7", &Method::DELETE);
        assert_eq!(module, "addresses");
        assert_eq!(action, "delete");
    }

    #[test]
    fn test_temple_sub_resources_use_child_module() {
        let (module, _) =
            parse_module_action("/api/temple-admin/temples/3/products/9", &Method::PUT);
        assert_eq!(module, "products");

        let (t, id) = extract_target("/api/temple-admin/temples/3/announcements/12");
        assert_eq!(t, Some("announcement".to_string()));
        assert_eq!(id, Some("12".to_string()));
    }

    #[test]
    fn test_temple_itself_is_target() {
        let (t, id) = extract_target("/api/admin/temples/3");
        assert_eq!(t, Some("temple".to_string()));
        assert_eq!(id, Some("3".to_string()));
    }

    #[test]
    fn test_extract_target_without_id() {
        assert_eq!(extract_target("/api/checkins"), (None, None));
        assert_eq!(extract_target("/api/notifications/read-all"), (None, None));
    }

    #[test]
    fn test_extract_client_ip() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), Some("203.0.113.7".to_string()));

        let request = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), Some("198.51.100.2".to_string()));

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request), None);
    }

    #[test]
    fn test_is_write_method() {
        assert!(is_write_method(&Method::POST));
        assert!(is_write_method(&Method::PUT));
        assert!(is_write_method(&Method::PATCH));
        assert!(is_write_method(&Method::DELETE));
        assert!(!is_write_method(&Method::GET));
        assert!(!is_write_method(&Method::OPTIONS));
    }
}
