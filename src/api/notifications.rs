use crate::api::AppState;
use crate::notifications::ACCEPTED;
use axum::{body::Bytes, extract::State, http::header, response::IntoResponse};
use tracing::error;

/// Gateway notification endpoint.
///
/// Always answers 200 with the acknowledgement token, whatever happened to
/// the items. Handling runs in its own task so a panic is contained here.
pub async fn receive(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let handler = state.handler.clone();
    let handled = tokio::spawn(async move { handler.handle(&body).await }).await;

    if let Err(e) = handled {
        error!("Notification handling aborted: {}", e);
    }

    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], ACCEPTED)
}
