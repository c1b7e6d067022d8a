use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::routes::AppState;
use crate::api::{auth, routes, websocket};

/// HTTP server exposing the ingestion WebSocket and the control surface.
pub struct ApiServer {
    state: AppState,
    bind_addr: String,
}

impl ApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();
        let api_key = state.api_key.clone();

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Control routes sit behind the API key; the ingestion socket is
        // open to traffic sources.
        let control = Router::new()
            .route("/status", get(routes::get_status))
            .route("/attack-patterns", get(routes::get_attack_patterns))
            .route("/active-threats", get(routes::get_active_threats))
            .route("/blocked-ips", get(routes::get_blocked_ips))
            .route("/blocked-ips/stats", get(routes::get_blocking_stats))
            .route("/block-ip", post(routes::block_ip))
            .route("/unblock-ip", post(routes::unblock_ip))
            .route("/is-blocked/{ip}", get(routes::is_blocked))
            .layer(middleware::from_fn_with_state(
                api_key,
                auth::auth_middleware,
            ));

        let app = Router::new()
            .route("/ws", get(websocket::ingest_handler))
            .merge(control)
            .layer(cors)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!("API listening on {}", self.bind_addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
