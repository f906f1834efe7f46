//! HTTP surface: admission checks for sidecar callers, an enforcing
//! middleware for in-process routers, plus health and metrics endpoints.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prometheus::TextEncoder;
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;

use crate::service::{AdmissionService, Verdict};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AdmissionService>,
}

/// Body of `POST /v1/check`
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub resource: Option<String>,
    pub operation: Option<String>,
    pub client: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/v1/check", post(check))
        .with_state(state)
}

async fn check(State(state): State<AppState>, Json(request): Json<CheckRequest>) -> Response {
    let verdict = state
        .service
        .check(
            request.resource.as_deref(),
            request.operation.as_deref(),
            &request.client,
        )
        .await;

    match verdict {
        Verdict::Proceed => Json(json!({ "allowed": true })).into_response(),
        rejected => rejection_response(rejected),
    }
}

/// Middleware admitting requests by peer address.
///
/// The first path segment names the resource and the second the operation,
/// so `/users/index` is checked against limits for `users` and
/// `users#index`. Requires the router to be served with connect info.
pub async fn enforce(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let (resource, operation) = route_identity(request.uri().path());
    let verdict = state
        .service
        .check(resource, operation, &peer.ip().to_string())
        .await;

    match verdict {
        Verdict::Proceed => next.run(request).await,
        rejected => rejection_response(rejected),
    }
}

fn route_identity(path: &str) -> (Option<&str>, Option<&str>) {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    (segments.next(), segments.next())
}

fn rejection_response(verdict: Verdict) -> Response {
    match verdict {
        Verdict::Proceed => StatusCode::OK.into_response(),
        Verdict::Reject {
            status,
            retry_after_secs,
            body,
        } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
            let mut response = (status, body).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.service.health_check().await {
        Ok(()) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
        Err(e) => {
            warn!("Health check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.service.metrics().registry().gather();

    encoder
        .encode_to_string(&metric_families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limiter::RateLimiter, metrics::Metrics, registry::LimitRegistry,
        store::MemoryCounterStore,
    };
    use axum::{body::Body, middleware};
    use tower::ServiceExt;

    fn test_state(registry: LimitRegistry) -> AppState {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(Arc::new(registry), store);
        let metrics = Arc::new(Metrics::new().unwrap());
        AppState {
            service: Arc::new(AdmissionService::new(limiter, metrics)),
        }
    }

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route("/:resource/:operation", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, enforce))
    }

    fn request_from(uri: &str, ip: [u8; 4]) -> Request {
        let mut request = axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        request
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_route_identity() {
        assert_eq!(route_identity("/anon/index"), (Some("anon"), Some("index")));
        assert_eq!(route_identity("/anon"), (Some("anon"), None));
        assert_eq!(route_identity("/"), (None, None));
        assert_eq!(route_identity("//anon//index/7"), (Some("anon"), Some("index")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_short_circuits_with_429() {
        let mut registry = LimitRegistry::new();
        registry.register(5, 2, Some("anon"), None).unwrap();
        let app = protected_app(test_state(registry));

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("/anon/index", [10, 0, 0, 1])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, "ok");
        }

        let response = app.clone().oneshot(request_from("/anon/show", [10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
        assert_eq!(
            body_text(response).await,
            "Rate limit exceeded. Try again in 5 seconds"
        );

        // another peer has its own counters
        let response = app.oneshot(request_from("/anon/index", [10, 0, 0, 2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_endpoint() {
        let mut registry = LimitRegistry::new();
        registry.register(60, 1, Some("reports"), Some("export")).unwrap();
        let app = router(test_state(registry));

        let check = || {
            axum::http::Request::builder()
                .method("POST")
                .uri("/v1/check")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"resource":"reports","operation":"export","client":"acct-42"}"#,
                ))
                .unwrap()
        };

        let response = app.clone().oneshot(check()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"allowed":true}"#);

        let response = app.oneshot(check()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_text(response).await,
            "Rate limit exceeded. Try again in 60 seconds"
        );
    }

    #[tokio::test]
    async fn test_health_and_metrics_endpoints() {
        let app = router(test_state(LimitRegistry::new()));

        let response = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("healthy"));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
