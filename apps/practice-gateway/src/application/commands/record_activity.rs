use crate::application::middleware::SessionContext;
use axum::{Extension, Json, http::StatusCode};
use practice_core::domain::session_guard::InteractionEvent;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
pub struct RecordActivityRequest {
    pub event: String,
}

/// Restarts the idle countdown for the caller's session.
pub async fn handle_record_activity_request(
    Extension(ctx): Extension<SessionContext>,
    Json(payload): Json<RecordActivityRequest>,
) -> StatusCode {
    let Ok(event) = payload.event.parse::<InteractionEvent>() else {
        debug!("Ignoring unknown interaction event '{}'", payload.event);
        return StatusCode::BAD_REQUEST;
    };
    ctx.session.guard.record_activity(event);
    StatusCode::NO_CONTENT
}
