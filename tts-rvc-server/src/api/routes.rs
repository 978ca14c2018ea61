use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::rvc::RvcClient;
use crate::tts::RaceCoordinator;

pub struct AppState {
    pub coordinator: RaceCoordinator,
    pub rvc: RvcClient,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let tts_routes = Router::new().route("/generate", post(handlers::generate));

    Router::new()
        .nest("/tts", tts_routes)
        .route("/health", get(handlers::health))
        .route("/openapi.json", get(handlers::openapi))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
