//! ldapgate authenticates users against a directory (LDAP/Active Directory),
//! grants the role mapped from their groups and provisions local accounts.

#![forbid(unsafe_code)]
#![deny(unused_mut)]
pub mod clock;
pub mod config;
mod database;
pub mod error;
pub mod ldap;
pub mod login;
mod middleware;
mod router;
pub mod session;
pub mod telemetry;
pub mod user;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;
use crate::ldap::DirectoryValidator;
use crate::login::{LocalPasswordLogin, LoginService};
use crate::user::{PgUserRepository, UserRepository};

/// Environment variable pointing to the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    form: &str,
    cookie: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(id) = cookie {
        request = request.header(header::COOKIE, session::session_cookie(id));
    }

    app.oneshot(request.body(axum::body::Body::from(form.to_owned())).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub login: Arc<LoginService>,
    pub sessions: session::SessionStore,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Directory binds are bounded by the connect timeout, not this one.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]));

    Router::new()
        // `GET /login` shows the form, `POST /login` logs in.
        .route("/login", get(router::login::form).post(router::login::handler))
        .route("/logout", get(router::login::logout))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::session,
        ))
        .route("/metrics", get(router::metrics::handler))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_default();
    let config = config::Configuration::default().path(path).read()?;
    let directory = Arc::new(config.ldap.clone().ok_or(ConfigError::MissingDirectory)?);

    let Some(postgres) = &config.postgres else {
        tracing::error!("missing `postgres` entry on configuration file");
        return Err("missing `postgres` configuration".into());
    };
    let db = database::Database::new(postgres).await?;
    db.migrate().await?;

    let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(db.postgres.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = session::SessionStore::new(config.session_lifetime(), Arc::clone(&clock));

    let login = LoginService::new(
        Arc::clone(&directory),
        Arc::new(DirectoryValidator::new(Arc::clone(&directory))),
        Arc::clone(&users),
        Arc::new(LocalPasswordLogin::new(users, Arc::clone(&clock))),
        clock,
    );

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    tracing::info!(
        server = %directory.url(),
        mappings = directory.group_map.len(),
        chained = directory.matching_rule_in_chain,
        "directory configured"
    );

    Ok(AppState {
        config,
        login: Arc::new(login),
        sessions,
        metrics,
    })
}
