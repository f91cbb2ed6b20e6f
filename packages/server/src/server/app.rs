//! Application setup and router wiring.

use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::scraper::{BroadcastForwarder, RunEvent, RunStore, ScrapeManager};
use crate::server::auth::SessionStore;
use crate::server::middleware::require_session;
use crate::server::routes::{
    cancel_handler, health_handler, login_handler, logout_handler, me_handler,
    run_detail_handler, run_logs_handler, runs_list_handler, status_handler,
    stories_list_handler, story_delete_handler, story_detail_handler, stream_handler,
    trigger_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub manager: ScrapeManager,
    pub run_store: Arc<dyn RunStore>,
    pub sessions: Arc<SessionStore>,
    pub events_tx: broadcast::Sender<RunEvent>,
}

/// Build the axum application router.
///
/// The scrape manager's status events are bridged into a broadcast channel
/// at construction so SSE clients can subscribe at any point afterwards.
pub fn build_app(pool: PgPool, manager: ScrapeManager, run_store: Arc<dyn RunStore>) -> Router {
    let (events_tx, _) = broadcast::channel(256);
    manager.subscribe(Arc::new(BroadcastForwarder::new(events_tx.clone())));

    let state = AppState {
        db_pool: pool,
        manager,
        run_store,
        sessions: Arc::new(SessionStore::new()),
        events_tx,
    };

    let admin_routes = Router::new()
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/me", get(me_handler))
        .route("/api/scraper/trigger", post(trigger_handler))
        .route("/api/scraper/status", get(status_handler))
        .route("/api/scraper/cancel", post(cancel_handler))
        .route("/api/scraper/runs", get(runs_list_handler))
        .route("/api/scraper/runs/:id", get(run_detail_handler))
        .route("/api/scraper/runs/:id/logs", get(run_logs_handler))
        .route("/api/stories", get(stories_list_handler))
        .route(
            "/api/stories/:id",
            get(story_detail_handler).delete(story_delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        // SSE does its own token auth (EventSource cannot send headers)
        .route("/api/scraper/stream", get(stream_handler))
        .merge(admin_routes)
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
