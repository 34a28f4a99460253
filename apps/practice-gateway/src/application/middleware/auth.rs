use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use practice_core::{AuthSession, AuthenticatedUser};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::AppState;
use crate::application::sessions::{ClientSession, open_session};

/// Caller identity and server-side session, inserted by [`session_auth`].
#[derive(Clone)]
pub struct SessionContext {
    pub token: String,
    pub user: AuthenticatedUser,
    pub session: Arc<ClientSession>,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolves the bearer token through the authentication provider.
///
/// An unknown or expired token drops any server-side session for it. A valid
/// token without a server-side session (e.g. after a restart) gets a fresh one.
pub async fn session_auth(
    State(app_state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = bearer_token(req.headers()) else {
        warn!("Authentication failed: missing, empty, or invalid Authorization header.");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let user = match app_state.auth.current_user(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Session token not recognized by the authentication provider.");
            app_state.sessions.close(&token);
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => {
            warn!("Authentication provider error during token lookup: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let session = match app_state.sessions.get(&token) {
        Some(session) if session.user.user_id == user.user_id => session,
        _ => {
            debug!("Rehydrating client session for user {}", user.user_id);
            open_session(
                &app_state,
                AuthSession {
                    token: token.clone(),
                    user: user.clone(),
                },
            )
            .await
        }
    };

    req.extensions_mut().insert(SessionContext {
        token,
        user,
        session,
    });
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sess-abc "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("sess-abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);
    }
}
