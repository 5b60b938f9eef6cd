//! Axum-based HTTP + WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::connection::handle_ws_connection;
use crate::handlers;
use crate::state::GatewayState;

/// Build the router without binding it, so tests can serve it themselves.
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = state.config.cors_enabled();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route(
            "/elements",
            get(handlers::list_elements)
                .post(handlers::create_element)
                .delete(handlers::clear_elements),
        )
        .route(
            "/elements/{id}",
            get(handlers::get_element)
                .put(handlers::update_element)
                .delete(handlers::delete_element),
        )
        .route("/elements/sync", post(handlers::sync_elements))
        .route("/elements/batch", post(handlers::apply_batch))
        .route("/elements/from-mermaid", post(handlers::from_mermaid))
        .route("/ai/actions", post(handlers::ai_actions))
        .route("/viewport", post(handlers::set_viewport));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(handlers::metrics));

    let app = app.with_state(state);
    if cors {
        app.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
    } else {
        app.layer(TraceLayer::new_for_http())
    }
}

/// Start the gateway server and run until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

