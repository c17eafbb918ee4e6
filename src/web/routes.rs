//! Route definitions

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/forecast", post(handlers::forecast))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::corpus::{HashEmbedder, SyntheticCorpusLoader};
    use crate::service::ForecastService;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn router() -> Router {
        let mut settings = Settings::default();
        settings.search.dimension = 8;
        settings.pool.capacity = 1;
        settings.corpus.synthetic_size = 200;
        settings.corpus.horizons = vec![24];

        let loader = SyntheticCorpusLoader::new(200, 42, settings.synthesis.variables.clone());
        let service = ForecastService::build(settings, &loader, Arc::new(HashEmbedder::new(8)))
            .await
            .unwrap();
        create_router(AppState::new(Arc::new(service)))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_forecast(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/forecast")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_forecast_ok() {
        let app = router().await;
        let response = app
            .oneshot(post_forecast(
                r#"{"horizon": 24, "k": 10, "queryTime": "2024-01-15T12:00:00Z", "correlationId": "web-1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["correlationId"], "web-1");
        assert_eq!(body["horizon"], 24);
        assert_eq!(body["searchMetadata"]["method"], "real");
        assert_eq!(body["searchMetadata"]["kUsed"], 10);
        assert!(body["variables"]["t2m"]["available"].is_boolean());
    }

    #[tokio::test]
    async fn test_invalid_horizon_is_400() {
        let app = router().await;
        let response = app
            .oneshot(post_forecast(
                r#"{"horizon": 99, "k": 10, "queryTime": "2024-01-15T12:00:00Z", "correlationId": "web-2"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["code"], "invalid_request");
        assert_eq!(body["correlationId"], "web-2");
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let app = router().await;
        let response = app.oneshot(post_forecast("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "invalid_request");
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let app = router().await;
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["degraded"], false);
        assert_eq!(body["pool"]["capacity"], 1);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["version"], crate::VERSION);
        assert_eq!(body["horizons"][0], 24);
    }
}
