//! 可观测性模块集成测试
//!
//! 测试指标记录函数与 HTTP 中间件的行为。

mod metrics_tests {
    use temple_shared::observability::metrics::{
        record_checkin, record_checkin_rejection, record_http_request, record_points_change,
        record_redemption, record_reward_claim,
    };

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/temples", 200, 0.05);
        record_http_request("POST", "/api/checkins", 201, 0.12);
        record_http_request("PUT", "/api/addresses/{id}", 200, 0.08);
        record_http_request("DELETE", "/api/notifications/{id}", 200, 0.03);
        record_http_request("GET", "/api/not-found", 404, 0.01);
        record_http_request("POST", "/api/redemptions", 500, 0.25);
    }

    #[test]
    fn test_record_domain_events() {
        record_checkin("manual", "general", 0.01);
        record_checkin("nfc", "temple", 0.03);
        record_checkin_rejection("duplicate");
        record_reward_claim("first_time", "auto");
        record_reward_claim("total_count", "manual");
        record_redemption("cancelled");
        record_points_change("checkin", 10);
        record_points_change("admin_adjust", i64::MIN);
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        record_http_request("", "", 0, 0.0);

        let long_path = "/api/".to_string() + &"x".repeat(1000);
        record_http_request("GET", &long_path, 200, 0.01);

        record_http_request("GET", "/api/temples?search=媽祖", 200, 999.99);
    }
}

mod middleware_tests {
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use temple_shared::observability::middleware::{
        REQUEST_ID_HEADER, RequestId, http_tracing, request_id,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|Extension(id): Extension<RequestId>| async move { id.0 }),
            )
            .layer(middleware::from_fn(http_tracing))
            .layer(middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let response = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap();
        assert!(uuid::Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(std::str::from_utf8(&body).unwrap(), header);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(REQUEST_ID_HEADER, "req-abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "req-abc-123"
        );
    }

    #[tokio::test]
    async fn test_tracing_passes_through_not_found() {
        let response = app()
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_request_id_accessor() {
        let id = RequestId("test-123".to_string());
        assert_eq!(id.as_str(), "test-123");
        assert_eq!(format!("{:?}", id.clone()), "RequestId(\"test-123\")");
    }
}

mod config_tests {
    use temple_shared::config::{AppConfig, ObservabilityConfig};

    #[test]
    fn test_default_observability_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        // SAFETY: 指向不存在的目录，仅影响本进程
        unsafe {
            std::env::set_var("CONFIG_DIR", "/nonexistent-config-dir");
        }
        let config = AppConfig::load("config-load-service").unwrap();
        assert_eq!(config.service_name, "config-load-service");
        assert_eq!(config.checkin.energy_per_checkin, 10);
    }
}
