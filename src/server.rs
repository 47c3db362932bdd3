//! HTTP surface with operation handlers
//!
//! Exposes TestConnection and FetchLatest as JSON POST endpoints (under both
//! the `/api/email/*` paths and the serverless-function paths), plus a
//! liveness probe. Each request runs in its own span with a fresh
//! `request_id`, opens exactly one IMAP session, and releases it before the
//! response is written.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::credentials::{Credentials, RawCredentials};
use crate::errors::{AppError, AppResult};
use crate::imap::MailTransport;
use crate::mailbox;
use crate::models::{ConnectionTestResponse, EmailResult, FetchLatestResponse, HealthResponse};
use crate::session::run_in_session;
use crate::transport::{ConnectionDescriptor, Operation};

/// Shared handler state
///
/// Holds configuration and the IMAP transport. Handlers never share
/// sessions; the transport only builds new ones.
pub struct AppState<T> {
    config: Arc<ServerConfig>,
    transport: Arc<T>,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: MailTransport> AppState<T> {
    pub fn new(config: ServerConfig, transport: T) -> Self {
        Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
        }
    }
}

/// Body for unmatched paths and methods
#[derive(Debug, Serialize)]
struct FailureBody {
    success: bool,
    error: &'static str,
}

/// Build the application router with all middleware attached
///
/// # Errors
///
/// `InvalidRequest` if a configured CORS origin is not a valid header value.
pub fn router<T: MailTransport + 'static>(state: AppState<T>) -> AppResult<Router> {
    let cors = cors_layer(&state.config)?;
    let body_limit = state.config.body_limit_bytes;

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/email/test-connection", post(test_connection::<T>))
        .route("/test-email-connection", post(test_connection::<T>))
        .route("/api/email/fetch-latest", post(fetch_latest::<T>))
        .route("/fetch-latest-email", post(fetch_latest::<T>))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http());
    Ok(router)
}

fn cors_layer(config: &ServerConfig) -> AppResult<CorsLayer> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if config.cors_allow_any {
        return Ok(base.allow_origin(Any));
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| AppError::invalid(format!("invalid CORS origin '{origin}'")))
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(base
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::now())
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(FailureBody {
            success: false,
            error: "Method not allowed",
        }),
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(FailureBody {
            success: false,
            error: "Not found",
        }),
    )
        .into_response()
}

/// Endpoint: verify that the credentials can open INBOX
async fn test_connection<T: MailTransport + 'static>(
    State(state): State<AppState<T>>,
    payload: Result<Json<RawCredentials>, JsonRejection>,
) -> AppResult<Json<ConnectionTestResponse>> {
    let span = request_span(Operation::TestConnection);
    test_connection_impl(&state, payload)
        .instrument(span)
        .await
        .map(Json)
}

/// Endpoint: return the most recent INBOX message, or `null` when empty
async fn fetch_latest<T: MailTransport + 'static>(
    State(state): State<AppState<T>>,
    payload: Result<Json<RawCredentials>, JsonRejection>,
) -> AppResult<Json<FetchLatestResponse>> {
    let span = request_span(Operation::FetchLatest);
    fetch_latest_impl(&state, payload)
        .instrument(span)
        .await
        .map(Json)
}

fn request_span(operation: Operation) -> tracing::Span {
    let request_id = Uuid::new_v4();
    tracing::info_span!("request", %request_id, %operation)
}

/// Operation implementations
///
/// Validation happens before any network activity; invalid input never
/// reaches the transport.
async fn test_connection_impl<T: MailTransport>(
    state: &AppState<T>,
    payload: Result<Json<RawCredentials>, JsonRejection>,
) -> AppResult<ConnectionTestResponse> {
    let started = Instant::now();
    let operation = Operation::TestConnection;
    let credentials = parse_credentials(payload)?;
    let descriptor = ConnectionDescriptor::new(&credentials, operation, &state.config)?;
    log_start(&descriptor);

    let outcome = run_in_session(
        state.transport.as_ref(),
        &descriptor,
        operation.deadline(&state.config),
        |_session| Box::pin(async { Ok(()) }),
    )
    .await;

    log_outcome(started, &outcome);
    outcome.map(|()| ConnectionTestResponse::ok())
}

async fn fetch_latest_impl<T: MailTransport>(
    state: &AppState<T>,
    payload: Result<Json<RawCredentials>, JsonRejection>,
) -> AppResult<FetchLatestResponse> {
    let started = Instant::now();
    let operation = Operation::FetchLatest;
    let credentials = parse_credentials(payload)?;
    let descriptor = ConnectionDescriptor::new(&credentials, operation, &state.config)?;
    log_start(&descriptor);

    let outcome = run_in_session(
        state.transport.as_ref(),
        &descriptor,
        operation.deadline(&state.config),
        |session| {
            Box::pin(async move {
                let raw = mailbox::latest_message(session).await?;
                Ok(raw.as_ref().map(EmailResult::from_message))
            })
        },
    )
    .await;

    log_outcome(started, &outcome);
    outcome.map(|email| match email {
        Some(email) => FetchLatestResponse::found(email),
        None => FetchLatestResponse::empty(),
    })
}

fn parse_credentials(payload: Result<Json<RawCredentials>, JsonRejection>) -> AppResult<Credentials> {
    let Json(raw) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, status = %rejection.status(), "rejected request body");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::invalid("Request body too large")
        } else {
            AppError::invalid(format!("Invalid request body: {}", rejection.body_text()))
        }
    })?;
    raw.validate()
}

fn log_start(descriptor: &ConnectionDescriptor) {
    tracing::info!(
        host = %descriptor.host,
        port = descriptor.port,
        security = %descriptor.security,
        implicit_tls = descriptor.implicit_tls,
        encrypted = descriptor.encrypted(),
        "opening IMAP session"
    );
}

fn log_outcome<R>(started: Instant, outcome: &AppResult<R>) {
    match outcome {
        Ok(_) => tracing::info!(duration_ms = duration_ms(started), "operation succeeded"),
        Err(e) => tracing::warn!(
            duration_ms = duration_ms(started),
            code = e.code(),
            error = %e,
            "operation failed"
        ),
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
