use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::llm::chat::{ BoxError, ChunkStream };
use crate::models::chat::{ ChatRequest, CompletionRequest, Role };
use crate::models::stream::{ DONE_MARKER, MASKED_ERROR_TEXT, UI_MESSAGE_STREAM_HEADER, UI_MESSAGE_STREAM_VERSION };
use super::error::ApiError;
use super::stream::{ ui_message_stream, StreamOptions };

use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, Request, State },
    http::{ header, HeaderMap, HeaderName, HeaderValue },
    middleware::{ self, Next },
    response::{ sse::{ Event, KeepAlive, Sse }, IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::{ stream, StreamExt };
use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use log::{ debug, error, info, warn };
use serde_json::json;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };
use uuid::Uuid;

pub type RequestLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ChatAgent>,
    pub options: StreamOptions,
    pub api_key: Option<String>,
    pub limiter: Option<Arc<RequestLimiter>>,
}

impl AppState {
    pub fn new(agent: Arc<ChatAgent>, args: &Args) -> Self {
        Self {
            agent,
            options: StreamOptions {
                extract_reasoning: args.extract_reasoning,
                expose_errors: args.expose_provider_errors,
            },
            api_key: args.server_api_key.clone().filter(|k| !k.trim().is_empty()),
            limiter: NonZeroU32::new(args.rate_limit_per_second).map(|per_second| {
                Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
            }),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(UI_MESSAGE_STREAM_HEADER)]);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/completion", post(completion_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), guard_request))
        .route("/api/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

pub async fn start_http_server(addr: SocketAddr, state: AppState, args: &Args) -> Result<(), BoxError> {
    let app = router(state);

    match tls_paths(args)? {
        Some((cert_path, key_path)) => {
            let _ = rustls::crypto::ring::default_provider().install_default();
            info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(10)));
                }
            });

            info!("HTTPS server listening on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config).handle(handle).serve(app.into_make_service()).await?;
        }
        None => {
            let listener = tokio::net::TcpListener
                ::bind(addr).await
                .map_err(|e| format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e))?;
            info!("HTTP server listening on: http://{}", addr);
            axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;
        }
    }

    info!("Server stopped");
    Ok(())
}

fn tls_paths(args: &Args) -> Result<Option<(&str, &str)>, BoxError> {
    if !args.enable_tls {
        return Ok(None);
    }
    match (&args.tls_cert_path, &args.tls_key_path) {
        (Some(cert), Some(key)) => Ok(Some((cert.as_str(), key.as_str()))),
        (Some(_), None) | (None, Some(_)) => {
            error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
            Err("Missing TLS certificate or key path".into())
        }
        (None, None) => {
            error!("--enable-tls was set but no certificate/key paths provided.");
            Err("TLS enabled without cert/key".into())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, draining connections");
}

fn provided_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
}

async fn guard_request(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            warn!("Global request rate limit exceeded for {}", req.uri().path());
            return Err(ApiError::RateLimited);
        }
    }

    if let Some(required) = &state.api_key {
        if provided_api_key(req.headers()) != Some(required.as_str()) {
            warn!("{}: bad or missing API key", req.uri().path());
            return Err(ApiError::Unauthorized);
        }
    }

    Ok(next.run(req).await)
}

fn validate_chat(request: &ChatRequest) -> Result<(), ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }
    let has_text = request.messages
        .iter()
        .any(|m| m.role != Role::System && !m.text().trim().is_empty());
    if !has_text {
        return Err(ApiError::BadRequest("messages contain no text".into()));
    }
    Ok(())
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    validate_chat(&request)?;

    let message_id = Uuid::new_v4().to_string();
    info!(
        "Chat request: chat={} messages={} trigger={:?} -> message {}",
        request.id.as_deref().unwrap_or("-"),
        request.messages.len(),
        request.trigger,
        message_id
    );

    let upstream: ChunkStream = match state.agent.stream_chat(&request.messages).await {
        Ok(upstream) => upstream,
        Err(e) => Box::pin(stream::once(async move { Err(e) })),
    };

    let events = ui_message_stream(message_id, upstream, state.options)
        .map(|chunk| Event::default().json_data(chunk))
        .chain(stream::once(async { Ok::<_, axum::Error>(Event::default().data(DONE_MARKER)) }));

    Ok(
        (
            [
                (HeaderName::from_static(UI_MESSAGE_STREAM_HEADER), HeaderValue::from_static(UI_MESSAGE_STREAM_VERSION)),
                (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
            ],
            Sse::new(events).keep_alive(KeepAlive::default()),
        ).into_response()
    )
}

/// Streams the completion as plain UTF-8 text. An error before the first
/// byte becomes a JSON error response; a later one aborts the body.
async fn completion_handler(
    State(state): State<AppState>,
    payload: Result<Json<CompletionRequest>, JsonRejection>
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }
    debug!("Completion request ({} chars)", request.prompt.len());

    let upstream = state.agent.stream_prompt(&request.prompt).await.map_err(|e| {
        error!("Failed to start completion: {}", e);
        ApiError::Provider(
            if state.options.expose_errors { e.to_string() } else { MASKED_ERROR_TEXT.to_string() }
        )
    })?;

    let body = upstream.inspect(|item| {
        if let Err(e) = item {
            error!("Completion stream failed: {}", e);
        }
    });

    Ok(
        (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(body),
        ).into_response()
    )
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(
        json!({
            "status": "ok",
            "provider": state.agent.llm_type().to_string(),
            "model": state.agent.model(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    )
}
