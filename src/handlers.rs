use crate::AppState;
use crate::models::{
    FinishRequest, FixRequest, LoginRequest, LoginResponse, StartRequest, StreamRequest,
};
use crate::prometheus;
use crate::state;
use crate::stream_counter::StreamCounter;
use actix_web::{HttpResponse, Responder, get, post, web};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use actix_web_lab::sse;
use chrono::Utc;
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Maps a state error to the HTTP response the dashboard can act on. All of
/// these are local validation failures except `Storage`.
fn error_response(err: state::Error) -> HttpResponse {
    match err {
        state::Error::NoSuchSession => HttpResponse::NotFound().body("No such running session."),
        state::Error::AlreadyRunning => {
            HttpResponse::Conflict().body("A reading session is already running.")
        }
        state::Error::InvalidTimestamp => {
            HttpResponse::BadRequest().body("Fix timestamp is out of range.")
        }
        state::Error::Session(err) => HttpResponse::UnprocessableEntity().body(err.to_string()),
        state::Error::Geo(err) => HttpResponse::BadRequest().body(err.to_string()),
        state::Error::Storage(err) => {
            log::error!("Storage failure: {err:#}");
            HttpResponse::InternalServerError().body("Storage failure.")
        }
    }
}

/// Handler for the `/api/login` endpoint.
///
/// Verifies credentials against the password file and issues a bearer token.
#[post("/api/login")]
pub async fn login(
    data: web::Json<LoginRequest>,
    app_state: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let mut state = app_state.lock().await;

    if let Some(token) = state.create_token(&data.username, &data.password, Utc::now()) {
        Ok(web::Json(LoginResponse { token }))
    } else {
        Err(actix_web::error::ErrorUnauthorized("Invalid credentials."))
    }
}

/// Handler for the `/api/start` endpoint.
///
/// Begins a reading session for the authenticated reader; 409 when one is
/// already running.
#[post("/api/start")]
pub async fn start_session(
    auth: BearerAuth,
    data: web::Json<StartRequest>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let mut state = app_state.lock().await;
    let Some(subject) = state.check_token(auth.token(), Utc::now()) else {
        return HttpResponse::Unauthorized().finish();
    };

    match state
        .start_session(&subject, data.into_inner(), Utc::now())
        .await
    {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => error_response(err),
    }
}

/// Handler for the `/api/fix` endpoint.
///
/// Ingests one GPS fix for the running session. Stale and debounced fixes
/// still return 200; the body says what happened.
#[post("/api/fix")]
pub async fn post_fix(
    auth: BearerAuth,
    data: web::Json<FixRequest>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let mut state = app_state.lock().await;
    let Some(subject) = state.check_token(auth.token(), Utc::now()) else {
        return HttpResponse::Unauthorized().finish();
    };

    match state.add_fix(&subject, &data) {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => error_response(err),
    }
}

/// Handler for the `/api/finish` endpoint.
///
/// Finishes the running session and returns the derived figures, including
/// the completion estimate when one can be made.
#[post("/api/finish")]
pub async fn finish_session(
    auth: BearerAuth,
    data: web::Json<FinishRequest>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let mut state = app_state.lock().await;
    let Some(subject) = state.check_token(auth.token(), Utc::now()) else {
        return HttpResponse::Unauthorized().finish();
    };

    match state
        .finish_session(&subject, data.into_inner(), Utc::now())
        .await
    {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => error_response(err),
    }
}

/// Handler for the `/api/history` endpoint: finished sessions, newest first.
#[get("/api/history")]
pub async fn history(auth: BearerAuth, app_state: web::Data<AppState>) -> impl Responder {
    let mut state = app_state.lock().await;
    let Some(subject) = state.check_token(auth.token(), Utc::now()) else {
        return HttpResponse::Unauthorized().finish();
    };

    match state.history(&subject).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(err) => error_response(err),
    }
}

/// Handler for the `/api/progress` endpoint: per-book aggregates.
#[get("/api/progress")]
pub async fn progress(auth: BearerAuth, app_state: web::Data<AppState>) -> impl Responder {
    let mut state = app_state.lock().await;
    if state.check_token(auth.token(), Utc::now()).is_none() {
        return HttpResponse::Unauthorized().finish();
    }

    match state.progress().await {
        Ok(books) => HttpResponse::Ok().json(books),
        Err(err) => error_response(err),
    }
}

/// Handler for the `/api/stream` endpoint.
///
/// Server-sent events: a snapshot of the reader's running sessions first,
/// then fixes, finishes, and heartbeats as they happen.
#[get("/api/stream")]
pub async fn stream(
    data: web::Query<StreamRequest>,
    app_state: web::Data<AppState>,
    sse_counter: web::Data<Arc<AtomicU64>>,
) -> actix_web::Result<impl Responder> {
    let mut state = app_state.lock().await;
    let Some(subject) = state.check_token(&data.token, Utc::now()) else {
        return Err(actix_web::error::ErrorUnauthorized("Invalid credentials."));
    };

    let updates = state.updates.updates(&state, subject).await;
    let counter = StreamCounter::new(sse_counter.get_ref().clone());

    let events = async_stream::stream! {
        let _counter = counter; // released when the client disconnects
        let mut updates = updates;
        while let Some(update) = updates.next().await {
            match update {
                Ok((_context, update)) => {
                    yield serde_json::to_string(&update)
                        .map(|json| sse::Event::Data(sse::Data::new(json)))
                        .map_err(anyhow::Error::from);
                }
                // A lagged subscriber skips what it missed and keeps going;
                // the next heartbeat refreshes its view.
                Err(err) => {
                    log::warn!("SSE subscriber fell behind: {err}");
                    continue;
                }
            }
        }
    };

    Ok(sse::Sse::from_stream(events).with_keep_alive(std::time::Duration::from_secs(5)))
}

/// Handler for the `/metrics` endpoint, Prometheus text format.
#[get("/metrics")]
pub async fn metrics(
    app_state: web::Data<AppState>,
    sse_counter: web::Data<Arc<AtomicU64>>,
    start_time: web::Data<Instant>,
) -> impl Responder {
    let state = app_state.lock().await;
    let body = prometheus::generate_metrics(
        &state,
        sse_counter.load(Ordering::SeqCst),
        start_time.get_ref(),
    );
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body)
}
