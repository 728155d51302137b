//! HTTP route handlers.
//!
//! Every mutating endpoint runs the same outer-to-inner gate before
//! touching any state: chat-model validator, then (where audio applies)
//! the audio model/voice validator, then the rate-limit gate. Both
//! validators substitute the configured default for an empty string
//! before checking the allow-list, so `""` always means "use whatever the
//! operator configured" rather than "reject".
//!
//! All four generation-style POST endpoints (`ait/postMessage`,
//! `conversation/postMessage`, `generate/postMessage`,
//! `translation/translate`) enqueue a job and return `425 processing`
//! immediately; the matching `GET` endpoint is how the caller learns the
//! result. `GET` endpoints never touch the rate limiter — they only read
//! in-memory state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AitError, AitResult};
use crate::queue::{Job, RequestKind};
use crate::rate_limiter::resolve_ip_address;
use crate::session::{self, GenerationStatus, Session, UserMessage};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ait/postMessage", post(ait_post_message))
        .route("/ait/getMessageResponse", get(ait_get_message_response))
        .route("/ait/startConversation", post(ait_start_conversation))
        .route("/ait/resetJoinkey", post(ait_reset_join_key))
        .route("/ait/generateAudio", post(ait_generate_audio))
        .route("/conversation/start", post(conversation_start))
        .route("/conversation/postMessage", post(conversation_post_message))
        .route("/conversation/getMessageResponse", get(conversation_get_message_response))
        .route("/generate/postMessage", post(generate_post_message))
        .route("/generate/getMessageResponse", get(generate_get_message_response))
        .route("/translation/translate", post(translation_translate))
        .route("/translation/getTranslation", get(translation_get_translation))
        .route("/chat_models", get(chat_models))
        .route("/audio_models", get(audio_models))
        .route("/ait/stream-audio/{join_key}", get(stream_audio))
        .route("/statusAitalkmaster", get(status_aitalkmaster))
        .fallback(unknown_route)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------

/// HTTP 425 Too Early — the status every enqueue-and-poll endpoint
/// returns once a job has been accepted but not yet completed.
fn processing_status() -> StatusCode {
    StatusCode::from_u16(425).expect("425 is a valid status code")
}

fn processing(message_id: &str) -> Response {
    (processing_status(), Json(json!({"status": "processing", "message_id": message_id}))).into_response()
}

/// Rejects an empty key or one containing whitespace. `join_key`,
/// `conversation_key` and `session_key` are all embedded in on-disk paths
/// and broadcaster control-channel messages, so none of them may contain
/// whitespace.
fn validate_key(key: &str, field: &str) -> AitResult<()> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(AitError::InvalidInput(format!(
            "{field} must be non-empty and must not contain whitespace"
        )));
    }
    Ok(())
}

/// Substitutes `default_value` for an empty/blank request and checks the
/// result against `allowed`. Used for chat models, audio models, and
/// audio voices alike — the same substitute-then-validate shape applies
/// to each.
fn resolve_allowed(allowed: &[String], default_value: &str, requested: &str, field: &str) -> AitResult<String> {
    let candidate = if requested.trim().is_empty() { default_value } else { requested };
    if allowed.iter().any(|m| m == candidate) {
        Ok(candidate.to_string())
    } else {
        Err(AitError::InvalidInput(format!("{field} '{candidate}' is not in the configured allow-list")))
    }
}

fn client_ip(state: &AppState, peer: SocketAddr, headers: &HeaderMap) -> AitResult<String> {
    let peer_address = peer.ip().to_string();
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string());

    resolve_ip_address(state.ip_source, Some(&peer_address), forwarded_for.as_deref())
        .ok_or_else(|| AitError::InvalidInput("missing X-Forwarded-For header".to_string()))
}

fn check_quota(state: &AppState, ip_address: &str) -> AitResult<()> {
    if state.rate_limiting_enabled() && state.rate_limiter.exceeded(ip_address) {
        return Err(AitError::QuotaExceeded(ip_address.to_string()));
    }
    Ok(())
}

fn resolve_chat_model(state: &AppState, requested: &str) -> AitResult<String> {
    resolve_allowed(
        &state.config.chat_client.allowed_models,
        &state.config.chat_client.default_model,
        requested,
        "model",
    )
}

/// Validates the audio model/voice pair against the configured
/// `audio_client` allow-lists. Returns `(None, None)` when no TTS
/// provider is configured rather than erroring — audio is opt-in on
/// every endpoint that accepts it except `generateAudio`, which requires
/// it outright.
fn resolve_audio(state: &AppState, voice: &str, model: &str) -> AitResult<(Option<String>, Option<String>)> {
    let Some(audio_client) = &state.config.audio_client else {
        return Ok((None, None));
    };
    if !state.audio_configured() {
        return Ok((None, None));
    }
    let voice = resolve_allowed(&audio_client.allowed_voices, &audio_client.default_voice, voice, "audio_voice")?;
    let model = resolve_allowed(&audio_client.allowed_models, &audio_client.default_model, model, "audio_model")?;
    Ok((Some(voice), Some(model)))
}

/// Ensures a session exists for `join_key`. When one is newly created
/// (rather than reused) the prior on-disk state for that key is archived
/// and the stream delivery backend is told to start a mount — the
/// resolved behavior for "direct-stream endpoint creates a session on
/// open" and for the first `postMessage`/`startConversation` on a key.
async fn get_or_create_session(state: &AppState, join_key: &str) -> Arc<Mutex<Session>> {
    let (session, created) = state.sessions.get_or_create(join_key);
    if created {
        if let Err(e) = session::archive::reset_join_key(&state.generated_audio_dir, join_key) {
            log::error!("get_or_create_session: archiving {join_key} failed: {e}");
        }
        if let Err(e) = state.stream_delivery.start_mount(join_key).await {
            log::warn!("get_or_create_session: starting mount for {join_key} failed: {e}");
        }
    }
    session
}

fn generation_response(message_id: &str, status: Option<&GenerationStatus>) -> Result<Response, AitError> {
    match status {
        Some(GenerationStatus::Ready { text, filename }) => Ok((
            StatusCode::OK,
            Json(json!({"message_id": message_id, "response": text, "filename": filename})),
        )
            .into_response()),
        Some(GenerationStatus::Failed { message }) => Err(AitError::ProviderFailure(message.clone())),
        Some(GenerationStatus::Pending) | None => Err(AitError::NotReady),
    }
}

async fn unknown_route() -> StatusCode {
    StatusCode::UNAUTHORIZED
}

// ---------------------------------------------------------------------
// /ait/*
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AitPostMessageRequest {
    join_key: String,
    speaker_name: String,
    message: String,
    message_id: String,
    character_name: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    system_instructions: String,
    #[serde(default)]
    audio_voice: String,
    #[serde(default)]
    audio_model: String,
    #[serde(default)]
    audio_instructions: String,
}

async fn ait_post_message(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<AitPostMessageRequest>,
) -> Result<Response, AitError> {
    validate_key(&req.join_key, "join_key")?;
    let model = resolve_chat_model(&state, &req.model)?;
    let (audio_voice, audio_model) = resolve_audio(&state, &req.audio_voice, &req.audio_model)?;

    let ip_address = client_ip(&state, peer, &headers)?;
    check_quota(&state, &ip_address)?;

    let session = get_or_create_session(&state, &req.join_key).await;
    session
        .lock()
        .push_user_message(UserMessage::new(req.message, req.speaker_name, req.message_id.clone()))?;

    let audio_instructions = (!req.audio_instructions.is_empty()).then_some(req.audio_instructions);

    let job = Job::new(
        ip_address,
        RequestKind::AitPost {
            join_key: req.join_key,
            character_name: req.character_name,
            model,
            system_instructions: req.system_instructions,
            message_id: req.message_id.clone(),
            audio_voice,
            audio_model,
            audio_instructions,
        },
    );
    state.message_workers.try_submit(job)?;

    Ok(processing(&req.message_id))
}

#[derive(Debug, Deserialize)]
struct JoinKeyMessageQuery {
    join_key: String,
    message_id: String,
}

async fn ait_get_message_response(
    State(state): State<Arc<AppState>>,
    Query(q): Query<JoinKeyMessageQuery>,
) -> Result<Response, AitError> {
    let session = state
        .sessions
        .get(&q.join_key)
        .ok_or_else(|| AitError::InvalidInput(format!("unknown join_key {}", q.join_key)))?;
    let guard = session.lock();
    let response = guard.response_for(&q.message_id).ok_or(AitError::NotReady)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "message_id": q.message_id,
            "response": response.text,
            "filename": response.filename,
            "audio_ready_at": response.audio_ready_at,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct JoinKeyRequest {
    join_key: String,
}

async fn ait_start_conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinKeyRequest>,
) -> Result<Response, AitError> {
    validate_key(&req.join_key, "join_key")?;
    get_or_create_session(&state, &req.join_key).await;
    let stream_url = state
        .direct_stream
        .as_ref()
        .map(|_| format!("/ait/stream-audio/{}", req.join_key));
    Ok((StatusCode::OK, Json(json!({"join_key": req.join_key, "stream_url": stream_url}))).into_response())
}

async fn ait_reset_join_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinKeyRequest>,
) -> Result<Response, AitError> {
    validate_key(&req.join_key, "join_key")?;
    session::archive::reset_join_key(&state.generated_audio_dir, &req.join_key)?;
    state.sessions.remove(&req.join_key);
    // Does NOT stop the broadcaster/direct mount — a reused join_key
    // picks the mount back up without interrupting its listeners.
    state.stream_delivery.on_reset(&req.join_key).await;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
struct GenerateAudioRequest {
    join_key: String,
    text: String,
    message_id: String,
    #[serde(default)]
    voice: String,
    #[serde(default)]
    model: String,
}

async fn ait_generate_audio(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<GenerateAudioRequest>,
) -> Result<Response, AitError> {
    validate_key(&req.join_key, "join_key")?;
    if !state.audio_configured() {
        return Err(AitError::InvalidInput("no audio provider configured".to_string()));
    }
    let audio_client = state
        .config
        .audio_client
        .as_ref()
        .expect("audio_configured implies audio_client is set");
    let voice = resolve_allowed(&audio_client.allowed_voices, &audio_client.default_voice, &req.voice, "voice")?;
    let model = resolve_allowed(&audio_client.allowed_models, &audio_client.default_model, &req.model, "model")?;

    let ip_address = client_ip(&state, peer, &headers)?;
    check_quota(&state, &ip_address)?;

    state
        .generations
        .lock()
        .insert_pending(req.message_id.clone(), req.text.clone(), String::new(), model.clone(), json!({}));

    let job = Job::new(
        ip_address,
        RequestKind::AudioGenerate {
            join_key: req.join_key,
            text: req.text,
            voice,
            model,
            message_id: req.message_id.clone(),
        },
    );
    state.audio_workers.try_submit(job)?;

    Ok(processing(&req.message_id))
}

// ---------------------------------------------------------------------
// /conversation/*
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConversationStartRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    system_instructions: String,
    #[serde(default)]
    options: JsonValue,
}

async fn conversation_start(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ConversationStartRequest>,
) -> Result<Response, AitError> {
    let model = resolve_chat_model(&state, &req.model)?;
    let ip_address = client_ip(&state, peer, &headers)?;
    check_quota(&state, &ip_address)?;

    let options = if req.options.is_null() { json!({}) } else { req.options };
    let conversation = state.conversations.create(model, req.system_instructions, options);
    let conversation_key = conversation.lock().conversation_key().to_string();
    Ok((StatusCode::OK, Json(json!({"conversation_key": conversation_key}))).into_response())
}

#[derive(Debug, Deserialize)]
struct ConversationPostMessageRequest {
    conversation_key: String,
    speaker_name: String,
    message: String,
    message_id: String,
}

async fn conversation_post_message(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ConversationPostMessageRequest>,
) -> Result<Response, AitError> {
    let conversation = state
        .conversations
        .get(&req.conversation_key)
        .ok_or_else(|| AitError::InvalidInput(format!("unknown conversation_key {}", req.conversation_key)))?;

    let ip_address = client_ip(&state, peer, &headers)?;
    check_quota(&state, &ip_address)?;

    conversation
        .lock()
        .push_user_message(UserMessage::new(req.message, req.speaker_name, req.message_id.clone()));

    let job = Job::new(
        ip_address,
        RequestKind::ConversationPost {
            conversation_key: req.conversation_key.clone(),
            message_id: req.message_id.clone(),
        },
    );
    state.message_workers.try_submit(job)?;

    Ok((
        processing_status(),
        Json(json!({
            "status": "processing",
            "message_id": req.message_id,
            "conversation_key": req.conversation_key,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ConversationMessageQuery {
    conversation_key: String,
    message_id: String,
}

async fn conversation_get_message_response(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ConversationMessageQuery>,
) -> Result<Response, AitError> {
    let conversation = state
        .conversations
        .get(&q.conversation_key)
        .ok_or_else(|| AitError::InvalidInput(format!("unknown conversation_key {}", q.conversation_key)))?;
    let guard = conversation.lock();
    let response = guard.response_for(&q.message_id).ok_or(AitError::NotReady)?;
    Ok((
        StatusCode::OK,
        Json(json!({"message_id": q.message_id, "response": response.text})),
    )
        .into_response())
}

// ---------------------------------------------------------------------
// /generate/*
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeneratePostMessageRequest {
    prompt: String,
    message_id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    system_instructions: String,
    #[serde(default)]
    options: JsonValue,
}

async fn generate_post_message(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<GeneratePostMessageRequest>,
) -> Result<Response, AitError> {
    let model = resolve_chat_model(&state, &req.model)?;
    let ip_address = client_ip(&state, peer, &headers)?;
    check_quota(&state, &ip_address)?;

    let options = if req.options.is_null() { json!({}) } else { req.options };
    state.generations.lock().insert_pending(
        req.message_id.clone(),
        req.prompt.clone(),
        req.system_instructions,
        model.clone(),
        options,
    );

    let job = Job::new(
        ip_address,
        RequestKind::Generate {
            model,
            prompt: req.prompt,
            message_id: req.message_id.clone(),
        },
    );
    state.message_workers.try_submit(job)?;

    Ok(processing(&req.message_id))
}

#[derive(Debug, Deserialize)]
struct MessageIdQuery {
    message_id: String,
}

async fn generate_get_message_response(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MessageIdQuery>,
) -> Result<Response, AitError> {
    let cache = state.generations.lock();
    generation_response(&q.message_id, cache.status(&q.message_id))
}

// ---------------------------------------------------------------------
// /translation/*
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TranslationTranslateRequest {
    session_key: String,
    text: String,
    target_language: String,
    message_id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    audio_voice: String,
    #[serde(default)]
    audio_model: String,
}

async fn translation_translate(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TranslationTranslateRequest>,
) -> Result<Response, AitError> {
    validate_key(&req.session_key, "session_key")?;
    let model = resolve_chat_model(&state, &req.model)?;
    let (audio_voice, audio_model) = resolve_audio(&state, &req.audio_voice, &req.audio_model)?;

    let ip_address = client_ip(&state, peer, &headers)?;
    check_quota(&state, &ip_address)?;

    state.generations.lock().insert_pending(
        req.message_id.clone(),
        req.text.clone(),
        String::new(),
        model.clone(),
        json!({"target_language": req.target_language}),
    );

    let job = Job::new(
        ip_address,
        RequestKind::Translation {
            session_key: req.session_key,
            model,
            text: req.text,
            target_language: req.target_language,
            message_id: req.message_id.clone(),
            audio_voice,
            audio_model,
        },
    );
    state.message_workers.try_submit(job)?;

    Ok(processing(&req.message_id))
}

async fn translation_get_translation(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MessageIdQuery>,
) -> Result<Response, AitError> {
    let cache = state.generations.lock();
    generation_response(&q.message_id, cache.status(&q.message_id))
}

// ---------------------------------------------------------------------
// Catalogs and status
// ---------------------------------------------------------------------

async fn chat_models(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({
        "default_model": state.config.chat_client.default_model,
        "allowed_models": state.config.chat_client.allowed_models,
    }))
}

async fn audio_models(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    match &state.config.audio_client {
        Some(cfg) => Json(json!({
            "configured": state.audio_configured(),
            "default_model": cfg.default_model,
            "default_voice": cfg.default_voice,
            "allowed_models": cfg.allowed_models,
            "allowed_voices": cfg.allowed_voices,
        })),
        None => Json(json!({"configured": false})),
    }
}

async fn status_aitalkmaster(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "conversations": state.conversations.len(),
        "audio_configured": state.audio_configured(),
    }))
}

// ---------------------------------------------------------------------
// Direct audio streaming (Mode A)
// ---------------------------------------------------------------------

async fn stream_audio(
    State(state): State<Arc<AppState>>,
    Path(join_key): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response, AitError> {
    let Some(direct) = &state.direct_stream else {
        return Err(AitError::NotFound("direct streaming is not configured; this deployment uses an external broadcaster".to_string()));
    };

    // Resolved design decision: opening the stream creates the session if
    // it doesn't already exist, mirroring the other ingress endpoints.
    get_or_create_session(&state, &join_key).await;

    let source_ip = peer.ip().to_string();
    let byte_stream = direct.listen(&join_key, &source_ip)?;
    let body = Body::from_stream(byte_stream.map(|item| item.map_err(std::io::Error::other)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .body(body)
        .map_err(|e| AitError::Internal(e.to_string()))
}
