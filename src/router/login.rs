use axum::extract::{Extension, Form, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::session::{CurrentSession, Session, expired_cookie, session_cookie};

pub const LOGIN_FAILED: &str = "Wrong username or password";

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(max = 255, message = "Login must not exceed 255 characters."))]
    pub login: Option<String>,
    #[validate(length(max = 1024, message = "Password is too long."))]
    pub password: Option<String>,
}

fn page(flash: Option<&str>) -> Html<String> {
    let flash = flash
        .map(|message| format!(r#"<p class="flash">{message}</p>"#))
        .unwrap_or_default();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Login</title></head>
<body>
{flash}
<form method="post" action="/login">
<input type="text" name="login" autocomplete="username">
<input type="password" name="password" autocomplete="current-password">
<button type="submit">Login</button>
</form>
</body>
</html>"#
    ))
}

fn drop_session(state: &AppState, current: &CurrentSession) {
    if let Some(id) = &current.id {
        state.sessions.remove(id);
    }
}

/// `GET /login`: forget any session and show the form.
pub async fn form(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> Response {
    drop_session(&state, &current);

    ([(header::SET_COOKIE, expired_cookie())], page(None)).into_response()
}

/// `POST /login`.
pub async fn handler(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Form(body): Form<Body>,
) -> Result<Response> {
    drop_session(&state, &current);
    body.validate()?;

    let mut session = Session::default();
    let granted = state
        .login
        .login(&mut session, body.login.as_deref(), body.password.as_deref())
        .await?;

    if granted {
        let id = state.sessions.save(session);
        Ok((
            [(header::SET_COOKIE, session_cookie(&id))],
            Redirect::to(&state.config.index),
        )
            .into_response())
    } else {
        Ok(([(header::SET_COOKIE, expired_cookie())], page(Some(LOGIN_FAILED))).into_response())
    }
}

/// `GET /logout`.
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> Response {
    drop_session(&state, &current);

    ([(header::SET_COOKIE, expired_cookie())], Redirect::to("/login")).into_response()
}
