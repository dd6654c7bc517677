mod handlers;
mod state;

use axum::http::{header, HeaderValue};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info};

use crate::config::LocatorConfig;
use crate::location::http::{HttpClient, UreqClient};
use crate::location::orchestrator::build_chains;

pub use state::AppState;

pub fn build_state(config: LocatorConfig, http: Arc<dyn HttpClient>) -> Arc<AppState> {
    let (geocoder, ip) = build_chains(&config, http);
    Arc::new(AppState { config, geocoder, ip })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/location", get(handlers::current_location))
        .route("/api/ip-location", get(handlers::ip_location))
        .route("/api/reverse", get(handlers::reverse))
        .route("/api/distance", get(handlers::distance))
        .route("/api/support", get(handlers::support))
        .route("/api/instructions", get(handlers::instructions))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, config: LocatorConfig) -> std::io::Result<()> {
    let http: Arc<dyn HttpClient> = Arc::new(UreqClient::new(&config.user_agent));
    let state = build_state(config, http);
    info!(
        "geocoding chain: {}; ip chain: {}",
        state.geocoder.provider_names().join(" -> "),
        state.ip.provider_names().join(" -> "),
    );
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("cannot bind to {}: {}", addr, e);
        e
    })?;

    info!("locus server listening on http://{}", addr);
    // Handlers need the peer address to locate the calling client.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
}
