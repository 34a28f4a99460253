use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use practice_core::Notice;
use practice_core::domain::session_guard::{SESSION_EXPIRED_EVENT, session_topic};
use std::convert::Infallible;
use tracing::{debug, info};

use super::middleware::SessionContext;
use crate::{AppState, map_core_error};

fn to_event(notice: &Notice) -> Event {
    Event::default()
        .event(&notice.event_type)
        .data(String::from_utf8_lossy(&notice.payload))
}

// GET /api/session/events
/// Streams the caller's `session.{user_id}` notices as server-sent events.
///
/// The stream ends after a `SessionExpired` event: the token is dead by then.
pub async fn handle_session_events(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let user_id = ctx.user.user_id.clone();
    let notices = state
        .notice_feed
        .listen(&session_topic(&user_id))
        .await
        .map_err(map_core_error)?;
    info!(%user_id, "Session event stream opened");

    let events = stream::unfold((notices, false), move |(mut notices, finished)| {
        let user_id = user_id.clone();
        async move {
            if finished {
                info!(%user_id, "Session event stream closed after expiry");
                return None;
            }
            let notice = notices.next().await?;
            debug!(%user_id, event = %notice.event_type, "Forwarding session notice");
            let last = notice.event_type == SESSION_EXPIRED_EVENT;
            Some((Ok::<_, Infallible>(to_event(&notice)), (notices, last)))
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
