//! SSE streaming of run status events.
//!
//! GET /api/scraper/stream?token=SESSION
//!
//! Forwards the manager's status events to the browser as SSE. EventSource
//! cannot send custom headers, so the session token is accepted as a query
//! param with the Authorization header as a fallback.

use std::convert::Infallible;

use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::ApiError;
use crate::server::app::AppState;
use crate::server::middleware::bearer_token;

#[derive(Deserialize)]
pub struct StreamQuery {
    token: Option<String>,
}

/// SSE stream handler.
///
/// Emits a `connected` event, then one `status` event per run transition.
/// A slow consumer that falls behind the broadcast buffer receives a
/// `lagged` event instead of the missed messages.
pub async fn stream_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or(ApiError::Unauthorized)?;
    state
        .sessions
        .get_session(&token)
        .await
        .ok_or(ApiError::Unauthorized)?;

    let rx = state.events_tx.subscribe();

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(event) => Event::default()
                .event("status")
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(BroadcastStreamRecvError::Lagged(missed)) => Event::default()
                .event("lagged")
                .json_data(&serde_json::json!({ "missed": missed }))
                .ok()
                .map(Ok),
        }
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::default()))
}
