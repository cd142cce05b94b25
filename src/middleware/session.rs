use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::Session;
use crate::state::AppState;

/// Result of session resolution for the current request. `None` is not an
/// error here; the guard decides whether the route needs a session.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Session>);

pub async fn session_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let session = state.sessions.resolve(request.headers()).await;
    if let Some(session) = &session {
        tracing::debug!(user_id = %session.user_id, role = %session.role, "session resolved");
    }
    request.extensions_mut().insert(CurrentSession(session));
    next.run(request).await
}
