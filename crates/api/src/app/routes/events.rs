use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/events/AppOpened", post(app_opened))
        .route("/events/:event_name", post(track_event))
}

/// POST /events/AppOpened
///
/// Adapter passthrough; always answers `200`. A malformed body is treated
/// as an empty payload rather than rejected.
pub async fn app_opened(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let body = lenient_body(&body);
    let result = services.dispatcher.analytics().app_opened(body).await;
    (StatusCode::OK, Json(result)).into_response()
}

/// POST /events/:event_name
pub async fn track_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(event_name): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let body = lenient_body(&body);
    let result = services
        .dispatcher
        .analytics()
        .track_event(&event_name, body)
        .await;
    (StatusCode::OK, Json(result)).into_response()
}

fn lenient_body(bytes: &[u8]) -> JsonValue {
    if bytes.is_empty() {
        return json!({});
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| json!({}))
}
