use crate::config::Config;
use crate::db::Database;
use crate::errors::AppError;
use crate::handlers::{self, AppState};
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorError,
    GovernorLayer,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

/// Period data endpoints. These sit behind the rate limiter.
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/period_data", get(handlers::get_period_data))
        .route("/api/period_data/upsert", post(handlers::upsert_period_data))
        .route("/api/period_data/last", get(handlers::get_last_period))
        .route("/api/period_data/list", get(handlers::list_period_data))
}

/// Health and banner routes, exempt from rate limiting.
fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/health", get(handlers::health))
}

/// All routes with state attached and no middleware.
pub fn router(state: Arc<AppState>) -> Router {
    public_routes().merge(api_routes()).with_state(state)
}

/// Full application: routes plus rate limiting, body limit, CORS, security
/// headers and request tracing.
///
/// The returned router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the rate limiter
/// can fall back to the peer address when no forwarding header is present.
pub fn build_app(state: Arc<AppState>, config: &Config) -> anyhow::Result<Router> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_replenish_ms())
            .burst_size(config.rate_limit_requests)
            .key_extractor(SmartIpKeyExtractor)
            .error_handler(rate_limit_error)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
    );
    tracing::info!(
        "Rate limit: {} requests per {}s per client",
        config.rate_limit_requests,
        config.rate_limit_window_secs
    );

    let protected_routes = api_routes().layer(
        ServiceBuilder::new()
            .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    let app = public_routes()
        .merge(protected_routes)
        .with_state(state)
        .layer(map_response(json_error_body))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_allowed_origins)?)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ));

    Ok(app)
}

fn rate_limit_error(error: GovernorError) -> Response {
    match error {
        GovernorError::TooManyRequests { wait_time, .. } => AppError::RateLimited {
            retry_after_secs: wait_time,
        }
        .into_response(),
        GovernorError::UnableToExtractKey => {
            AppError::InternalError("unable to determine client address".to_string())
                .into_response()
        }
        GovernorError::Other { code, msg, .. } => (
            code,
            Json(json!({ "error": msg.unwrap_or_else(|| "Rate limiter error".to_string()) })),
        )
            .into_response(),
    }
}

/// Rewrites plain-text error responses produced by middleware and extractors
/// (body limit, unmatched methods, ...) into the `{"error": ...}` shape.
async fn json_error_body(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let message = match axum::body::to_bytes(body, 64 * 1024).await {
        Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(json!({ "error": message }).to_string()))
}

/// Any origin when none are configured, otherwise only the listed ones.
fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|_| anyhow::anyhow!("Invalid CORS origin '{}'", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}

/// Serves `app` until `shutdown` resolves, then closes the pool.
///
/// The pool is closed whether serving ended cleanly or with an error.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    db: &Database,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    if let Err(e) = &served {
        tracing::error!("Server error: {}", e);
    }
    tracing::info!("Server stopped, closing database pool");
    db.close().await;

    Ok(served?)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_config(rate_limit_requests: u32, body_limit_bytes: usize) -> Config {
        Config {
            database_url: "postgres://postgres@127.0.0.1:1/unused".to_string(),
            port: 0,
            db_schema: "komunalka".to_string(),
            db_max_connections: 1,
            db_acquire_timeout_secs: 1,
            db_ssl_mode: None,
            cors_allowed_origins: vec![],
            rate_limit_requests,
            rate_limit_window_secs: 60,
            body_limit_bytes,
        }
    }

    /// Full middleware stack over a pool that fails fast on every acquire.
    fn test_app(rate_limit_requests: u32, body_limit_bytes: usize) -> Router {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(300))
            .connect_lazy("postgres://postgres@127.0.0.1:1/unused")
            .unwrap();
        let state = Arc::new(AppState {
            storage: crate::db_storage::PeriodDataStorage::new(pool, "komunalka").unwrap(),
        });
        build_app(state, &test_config(rate_limit_requests, body_limit_bytes)).unwrap()
    }

    fn from_client(method: Method, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value, Response) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json, Response::from_parts(parts, Body::empty()))
    }

    #[tokio::test]
    async fn test_rate_limit_returns_json_429() {
        let app = test_app(1, 1024);

        // Missing apartment_id is rejected before the store, but still costs a token
        let (status, _, _) = send(
            &app,
            from_client(Method::GET, "/api/period_data/last", Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body, response) = send(
            &app,
            from_client(Method::GET, "/api/period_data/last", Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, json!({ "error": "Too Many Requests" }));
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_health_and_root_are_not_rate_limited() {
        let app = test_app(1, 1024);

        for _ in 0..3 {
            let (status, _, _) = send(&app, from_client(Method::GET, "/", Body::empty())).await;
            assert_eq!(status, StatusCode::OK);

            // The store is unreachable, so health fails, but never with 429
            let (status, body, _) =
                send(&app, from_client(Method::GET, "/health", Body::empty())).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["ok"], false);
        }
    }

    #[tokio::test]
    async fn test_oversized_body_is_json_413() {
        let app = test_app(100, 10);
        let payload = r#"[{"apartment_id": 1, "period": "2025-08", "item": "water"}]"#;

        // Declared length: refused by the limit layer before the handler runs
        let mut request = from_client(Method::POST, "/api/period_data/upsert", Body::from(payload));
        request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
        let (status, body, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].is_string(), "{}", body);

        // No declared length: cut off while the body is read
        let (status, body, _) = send(
            &app,
            from_client(Method::POST, "/api/period_data/upsert", Body::from(payload)),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].is_string(), "{}", body);
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let app = test_app(100, 1024);
        let (_, _, response) = send(&app, from_client(Method::GET, "/", Body::empty())).await;

        let headers = response.headers();
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::REFERRER_POLICY], "no-referrer");
    }

    #[tokio::test]
    async fn test_plain_text_errors_become_json() {
        let response = (StatusCode::METHOD_NOT_ALLOWED, "nope").into_response();
        let response = json_error_body(response).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "nope" }));
    }

    #[tokio::test]
    async fn test_empty_error_body_uses_reason_phrase() {
        let response = json_error_body(StatusCode::NOT_FOUND.into_response()).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "Not Found" }));
    }

    #[tokio::test]
    async fn test_serve_closes_pool_on_shutdown() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@127.0.0.1:1/unused")
            .unwrap();
        let db = Database { pool };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        serve(listener, test_app(100, 1024), &db, std::future::ready(()))
            .await
            .unwrap();
        assert!(db.pool.is_closed());
    }

    #[test]
    fn test_cors_rejects_invalid_origin() {
        assert!(cors_layer(&["https://ok.example".to_string()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
        assert!(cors_layer(&[]).is_ok());
    }
}
