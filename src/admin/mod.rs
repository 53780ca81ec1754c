//! Admin HTTP API.
//!
//! Read-only views of the bridge plus a few operator actions. Every route
//! requires the configured bearer token.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::bridge::RuntimeBridge;

#[derive(Clone)]
pub struct AdminState {
    pub bridge: Arc<RuntimeBridge>,
    pub api_key: Arc<str>,
}

pub fn admin_router(bridge: Arc<RuntimeBridge>, api_key: &str) -> Router {
    let state = AdminState {
        bridge,
        api_key: Arc::from(api_key),
    };

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/breakers/{name}/open", post(open_breaker))
        .route("/admin/breakers/{name}/close", post(close_breaker))
        .route("/admin/connection", get(get_connection))
        .route("/admin/connection/reset", post(reset_connection))
        .route("/admin/metrics/reset", post(reset_metrics))
        .route("/admin/events", get(get_events))
        .route("/admin/events/filters", get(get_event_filters))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::HookError;
    use crate::events::types::RuntimeEvent;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::runtime::traits::{Connector, RuntimeClient};
    use crate::runtime::types::{RemoteRequest, TransportError};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Idle;

    #[async_trait]
    impl RuntimeClient for Idle {
        async fn call(&self, _request: RemoteRequest) -> Result<Value, TransportError> {
            Ok(json!({"success": true}))
        }
    }

    #[async_trait]
    impl Connector for Idle {
        async fn connect(&self) -> Result<(), HookError> {
            Ok(())
        }
    }

    fn router() -> (Router, Arc<RuntimeBridge>) {
        let bridge = RuntimeBridge::new(BridgeConfig::default(), Arc::new(Idle), Arc::new(Idle));
        (admin_router(bridge.clone(), "secret"), bridge)
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let (router, _) = router();
        let missing = router.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router.oneshot(get("/admin/status", Some("nope"))).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_reports_bridge() {
        let (router, _) = router();
        let response = router.oneshot(get("/admin/status", Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["queue_depth"], 0);
        assert_eq!(body["breakers"][0]["name"], "runtime");
        assert_eq!(body["connection"]["state"], "disconnected");
    }

    #[tokio::test]
    async fn test_breaker_reset_unknown_is_404() {
        let (router, _) = router();
        let request = Request::builder()
            .method("POST")
            .uri("/admin/breakers/missing/reset")
            .header(AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_key_rejects_everything() {
        let bridge = RuntimeBridge::new(BridgeConfig::default(), Arc::new(Idle), Arc::new(Idle));
        let router = admin_router(bridge, "");
        let request = Request::builder()
            .uri("/admin/status")
            .header(AUTHORIZATION, "Bearer ")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_force_open_then_close_breaker() {
        let (router, bridge) = router();

        let response = router
            .clone()
            .oneshot(post("/admin/breakers/runtime/open"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "open");
        let breaker = bridge.breakers().get("runtime").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        let response = router
            .clone()
            .oneshot(post("/admin/breakers/runtime/close"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["state"], "closed");
        assert_eq!(breaker.state(), CircuitState::Closed);

        let missing = router.oneshot(post("/admin/breakers/missing/open")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_filter_stats() {
        let mut config = BridgeConfig::default();
        config.events.filters.blocked_types = vec!["position".into()];
        let bridge = RuntimeBridge::new(config, Arc::new(Idle), Arc::new(Idle));
        let router = admin_router(bridge.clone(), "secret");
        bridge.events().dispatch(&RuntimeEvent::new("position", json!({}))).await;
        bridge.events().dispatch(&RuntimeEvent::new("chat", json!({}))).await;

        let response = router
            .oneshot(get("/admin/events/filters", Some("secret")))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["total_events"], 2);
        assert_eq!(body["events_filtered"], 1);
        assert_eq!(body["filters"][0]["name"], "event_type");
    }

    #[tokio::test]
    async fn test_events_filtered_by_type() {
        let (router, bridge) = router();
        bridge.events().dispatch(&RuntimeEvent::new("chat", json!({"n": 1}))).await;
        bridge.events().dispatch(&RuntimeEvent::new("health", json!({"hp": 20}))).await;

        let response = router
            .oneshot(get("/admin/events?event_type=chat&limit=5", Some("secret")))
            .await
            .unwrap();
        let body = json_body(response).await;
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventType"], "chat");
    }
}
