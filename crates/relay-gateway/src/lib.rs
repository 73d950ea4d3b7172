//! Transport layer for the group relay.
//!
//! Provides:
//! - `RelayGateway` - the boundary every transport goes through
//! - WebSocket push transport
//! - HTTP pull transport guarded by one-time credentials
//! - Background rotation and daily purge

pub mod gateway;
pub mod objects;
pub mod pull;
pub mod schedule;
pub mod websocket;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use gateway::{GatewayConfig, GatewayError, Origin, RelayGateway};
pub use objects::MemoryObjectStore;

/// Create the full relay router: `/ws` plus the pull routes.
///
/// # Example
/// ```ignore
/// let app = relay_gateway::router(gateway);
/// axum::serve(listener, app).await?;
/// ```
#[must_use]
pub fn router(gateway: Arc<RelayGateway>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(websocket::ws_handler))
        .with_state(Arc::clone(&gateway))
        .merge(pull::pull_router(gateway))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
