//! HTTP pull transport.
//!
//! Guarded calls carry a one-time scoped secret in [`CREDENTIAL_HEADER`];
//! clients fetch a fresh one from `/credentials` before each call.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use relay_core::{Scope, traits::ObjectError};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    gateway::{GatewayError, Origin, RelayGateway},
    objects::OBJECTS_PATH,
};

/// Header carrying a scoped credential.
pub const CREDENTIAL_HEADER: &str = "x-relay-credential";
/// Header carrying the administrative key.
pub const ADMIN_HEADER: &str = "x-relay-admin-key";
/// Optional header identifying a polling client for presence.
pub const ORIGIN_HEADER: &str = "x-relay-origin";
/// Response header with the absolute index of the first history entry.
pub const OFFSET_HEADER: &str = "x-history-offset";
/// Response header carrying the number of clears so far.
pub const EPOCH_HEADER: &str = "x-history-epoch";

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) | Self::BadRequest(_) | Self::Object(ObjectError::Empty) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::Object(ObjectError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Object(ObjectError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Create the pull transport router.
#[must_use]
pub fn pull_router(gateway: Arc<RelayGateway>) -> Router {
    let upload_limit = gateway.max_upload_bytes();
    Router::new()
        .route("/", get(index))
        .route("/history", get(history))
        .route("/publish", post(publish))
        .route("/purge", post(purge))
        .route("/presence", get(presence))
        .route("/credentials", get(credentials))
        .route("/admin/credentials", get(admin_credentials))
        .route("/admin/rotate", post(admin_rotate))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit.saturating_add(1))),
        )
        .route(&format!("{OBJECTS_PATH}/{{id}}"), get(object))
        .with_state(gateway)
}

async fn index() -> &'static str {
    "group relay is running"
}

async fn history(
    State(gateway): State<Arc<RelayGateway>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    gateway.authorize(Scope::Read, header_str(&headers, CREDENTIAL_HEADER))?;
    if let Some(origin) = header_str(&headers, ORIGIN_HEADER) {
        gateway.touch_pull(origin);
    }
    let page = gateway.history();
    Ok((
        [
            (OFFSET_HEADER, page.offset.to_string()),
            (EPOCH_HEADER, page.epoch.to_string()),
        ],
        Json(page.messages),
    ))
}

async fn publish(
    State(gateway): State<Arc<RelayGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    gateway.authorize(Scope::Write, header_str(&headers, CREDENTIAL_HEADER))?;
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid JSON: {e}")))?;
    let index = gateway.publish(&raw, Origin::Pull).await?;
    Ok(Json(json!({ "success": true, "index": index })))
}

async fn purge(
    State(gateway): State<Arc<RelayGateway>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    gateway
        .purge(header_str(&headers, CREDENTIAL_HEADER))
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn presence(State(gateway): State<Arc<RelayGateway>>) -> impl IntoResponse {
    Json(json!({ "count": gateway.presence() }))
}

async fn credentials(State(gateway): State<Arc<RelayGateway>>) -> impl IntoResponse {
    Json(gateway.client_credentials())
}

async fn admin_credentials(
    State(gateway): State<Arc<RelayGateway>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let all = gateway.admin_credentials(header_str(&headers, ADMIN_HEADER))?;
    Ok(Json(all))
}

#[derive(Debug, Default, Deserialize)]
struct RotateRequest {
    scope: Option<Scope>,
}

async fn admin_rotate(
    State(gateway): State<Arc<RelayGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let admin = header_str(&headers, ADMIN_HEADER);
    let request: RotateRequest = if body.is_empty() {
        RotateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::BadRequest(format!("invalid rotate request: {e}")))?
    };
    let rotated = gateway.admin_rotate(admin, request.scope)?;
    Ok(Json(json!({ "rotated": rotated })))
}

async fn upload(
    State(gateway): State<Arc<RelayGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let mime = header_str(&headers, header::CONTENT_TYPE.as_str())
        .unwrap_or("application/octet-stream")
        .to_owned();
    let stored = gateway
        .upload(header_str(&headers, CREDENTIAL_HEADER), body, &mime)
        .await?;
    Ok(Json(stored))
}

async fn object(
    State(gateway): State<Arc<RelayGateway>>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    Ok(match gateway.object(&id).await? {
        Some(object) => ([(header::CONTENT_TYPE, object.mime)], object.data).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}
