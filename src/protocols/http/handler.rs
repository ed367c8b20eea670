//! Retrieval routes and handlers.

use crate::ids::PasteId;
use crate::store::PasteStore;
use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::warn;

/// Shared state passed to HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: PasteStore,
}

/// Build the retrieval router.
///
/// Only `GET /<id>` is routed; every other method or path falls through to
/// an empty 404. HEAD is routed explicitly since axum would otherwise answer
/// it through the GET handler.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/:id",
            get(get_paste)
                .head(empty_not_found)
                .fallback(empty_not_found),
        )
        .fallback(empty_not_found)
        .with_state(state)
}

async fn get_paste(
    State(state): State<AppState>,
    raw_id: Result<Path<String>, PathRejection>,
) -> Response {
    // Undecodable segments are malformed paths just like invalid ids
    let Some(id) = raw_id.ok().and_then(|Path(raw)| PasteId::parse(&raw)) else {
        return empty_not_found().await;
    };

    match state.store.get(&id).await {
        Ok(Some(content)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (header::CONTENT_LENGTH, content.len().to_string()),
            ],
            content,
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "Paste not found",
        )
            .into_response(),
        Err(e) => {
            warn!(%id, error = %e, "Failed to read paste");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn empty_not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}
