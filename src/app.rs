use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::JwksCache;
use crate::config::Settings;
use crate::middleware::{request_id_layer, X_REQUEST_ID};
use crate::routes;
use crate::services::{NotificationDispatcher, QuoteGenerator};

/// Request bodies are small JSON documents
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Settings,
    pub jwks_cache: JwksCache,
    pub notifier: NotificationDispatcher,
    pub quote_generator: QuoteGenerator,
}

impl AppState {
    /// Wire the outbound clients around one shared HTTP client
    pub fn new(db: PgPool, settings: Settings, http_client: reqwest::Client) -> Arc<Self> {
        let jwks_cache = JwksCache::new(
            http_client.clone(),
            settings.jwt_jwks_url.clone(),
            settings.jwt_issuer.clone(),
            settings.jwt_audience.clone(),
            settings.jwks_cache_ttl_seconds,
        );
        let notifier = NotificationDispatcher::new(http_client.clone(), &settings);
        let quote_generator = QuoteGenerator::new(http_client, &settings);

        Arc::new(Self {
            db,
            settings,
            jwks_cache,
            notifier,
            quote_generator,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // Spans at DEBUG keep INFO output to one line per business event
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let (set_request_id, propagate_request_id) = request_id_layer();

    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static(X_REQUEST_ID),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Environment;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    pub(crate) fn test_settings() -> Settings {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".to_string(),
            database_url: "postgres://ff:ff@127.0.0.1:1/ff_test".to_string(),
            database_max_connections: 1,
            run_migrations: false,
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            jwt_jwks_url: "http://127.0.0.1:1/jwks.json".to_string(),
            jwt_issuer: "https://auth.example.com".to_string(),
            jwt_audience: "authenticated".to_string(),
            jwks_cache_ttl_seconds: 60,
            email_service_url: None,
            email_service_token: String::new(),
            notification_timeout_seconds: 1,
            notification_max_retry_seconds: 1,
            quote_service_url: None,
            portal_base_url: "http://localhost:3000".to_string(),
            default_invitation_days: 7,
        }
    }

    /// Router over a pool that never connects unless a handler reaches the database
    pub(crate) fn test_app() -> Router {
        let settings = test_settings();
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy(&settings.database_url)
            .unwrap();
        create_app(AppState::new(pool, settings, reqwest::Client::new()))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn admin_routes_require_bearer_token() {
        let cases = [
            ("GET", "/ff-config/"),
            ("PUT", "/ff-assignments/"),
            ("POST", "/ff-invitations/"),
            ("GET", "/admin/pending-ff-quotes/"),
            ("POST", "/routing-orders/"),
            ("GET", "/forwarders/"),
            ("POST", "/ff-config/resolve"),
        ];

        for (method, uri) in cases {
            let response = test_app()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from("{}"))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
            let body = body_json(response).await;
            assert_eq!(body["success"], false);
            assert_eq!(body["code"], "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn cost_upload_rejects_non_bearer_scheme() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/pending-ff-quotes/{}/upload-costs/",
                        uuid::Uuid::new_v4()
                    ))
                    .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"freight_cost_usd": 10}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Invalid authorization format");
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/ff-config/")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-request-id").unwrap(),
            "req-123"
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = test_app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invitation_acceptance_requires_token() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ff-invitations/accept")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(format!(r#"{{"token": "{}"}}"#, uuid::Uuid::new_v4())))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Missing authorization token");
    }

    #[tokio::test]
    async fn health_reports_unreachable_database() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["services"]["database"], "error");
        assert_eq!(body["services"]["email_service"], "disabled");
    }
}
