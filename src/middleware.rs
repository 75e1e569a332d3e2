//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::session::{CurrentSession, cookie_value};

/// Resolve the session cookie into a [`CurrentSession`] extension.
pub async fn session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let id = cookie_value(req.headers()).map(str::to_owned);
    let session = id.as_deref().and_then(|id| state.sessions.get(id));

    if let Some(login) = session.as_ref().and_then(|s| s.login.as_deref()) {
        tracing::trace!(%login, "session resolved");
    }

    req.extensions_mut().insert(CurrentSession { id, session });
    next.run(req).await
}
