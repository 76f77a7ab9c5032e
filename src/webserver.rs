use crate::metrics::Metrics;
use axum::{
    Router, extract::State, http::StatusCode, http::header::CONTENT_TYPE,
    response::IntoResponse, routing::get,
};
use std::sync::Arc;
use tracing::error;

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_app(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::SyncResult;
    use crate::metrics::MetricsSink;

    #[tokio::test]
    async fn test_metrics_handler_renders_gauges() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.add_image(
            "apps",
            "web-0",
            "app",
            &SyncResult {
                image_url: "registry.cn-hangzhou.aliyuncs.com/team/app".to_owned(),
                is_latest: true,
                current_version: "v1".to_owned(),
                latest_version: "v1".to_owned(),
            },
        );

        let response = metrics_handler(State(metrics)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }

    #[tokio::test]
    async fn test_probes_return_no_content() {
        assert_eq!(
            liveness_probe().await.into_response().status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            readiness_probe().await.into_response().status(),
            StatusCode::NO_CONTENT
        );
    }
}
