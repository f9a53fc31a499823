//! HTTP surface: router construction and request handlers.
//!
//! Every store mutation happens behind a short lock inside the store; the
//! handlers here only sequence rate limiting, parsing, the mutation, and the
//! best-effort side effects (totals increments, live push).

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State, WebSocketUpgrade};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::invites::{ClaimOutcome, CreateOutcome};
use crate::mailbox::EnqueueOutcome;
use crate::rate_limit::{client_ip, RateAction};
use crate::state::AppState;
use crate::totals::{Total, TotalsError, TotalsSnapshot};
use crate::ws::{self, WsParams};

const OTM_BODY_LIMIT: usize = 1024 * 1024;
const FILE_BODY_LIMIT: usize = 12 * 1024 * 1024;
const INVITE_BODY_LIMIT: usize = 100 * 1024;
const CLAIM_BODY_LIMIT: usize = 100 * 1024;
const MESSAGE_BODY_LIMIT: usize = 500 * 1024;
const ACK_BODY_LIMIT: usize = 50 * 1024;

const BANNER: &str = "cinder relay: nothing to see here\n";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route(
            "/otm",
            post(otm_create).layer(DefaultBodyLimit::max(OTM_BODY_LIMIT)),
        )
        .route("/otm/:id", get(otm_take))
        .route(
            "/file",
            post(file_upload).layer(DefaultBodyLimit::max(FILE_BODY_LIMIT)),
        )
        .route("/file/:id", get(file_download))
        .route(
            "/chat/invite",
            post(invite_create).layer(DefaultBodyLimit::max(INVITE_BODY_LIMIT)),
        )
        .route("/chat/invite/:id", get(invite_get))
        .route(
            "/chat/invite/:id/claim",
            post(invite_claim).layer(DefaultBodyLimit::max(CLAIM_BODY_LIMIT)),
        )
        .route(
            "/chat/message",
            post(message_send).layer(DefaultBodyLimit::max(MESSAGE_BODY_LIMIT)),
        )
        .route("/chat/messages/:fingerprint", get(messages_fetch))
        .route(
            "/chat/messages/ack",
            post(messages_ack).layer(DefaultBodyLimit::max(ACK_BODY_LIMIT)),
        )
        .fallback(banner_or_upgrade)
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

/// Permissive CORS on every response; preflight is answered here with 204
/// and never reaches the router.
async fn cors(request: Request<axum::body::Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors(response.headers_mut());
    response
}

/// Unmatched routes answer a 200 text banner; WebSocket upgrades are
/// accepted on any path and classified by query parameter.
async fn banner_or_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    match upgrade {
        Some(handshake) => ws::handle_upgrade(handshake, params, state),
        None => (StatusCode::OK, BANNER).into_response(),
    }
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("invalid_request"))
}

async fn enforce_rate(
    state: &AppState,
    headers: &HeaderMap,
    addr: SocketAddr,
    action: RateAction,
) -> Result<(), ApiError> {
    let ip = client_ip(headers, Some(addr));
    if state.rate_limiter.check(&ip, action).await {
        Ok(())
    } else {
        debug!(%ip, ?action, "rate limited");
        Err(ApiError::RateLimited)
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> Result<Json<TotalsSnapshot>, ApiError> {
    let snapshot = state.totals.read().await.map_err(|error| {
        if let TotalsError::Query(ref cause) = error {
            warn!(%cause, "metrics read failed");
        }
        ApiError::from(error)
    })?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
struct OtmCreateRequest {
    ciphertext: String,
}

async fn otm_create(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::OtmPost).await?;

    let request: OtmCreateRequest = parse_json(&body)?;
    let id = state.otm.put(request.ciphertext).await;
    state.totals.increment(Total::OtmCreated);

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn otm_take(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::OtmGet).await?;

    match state.otm.take(&id).await {
        Some(ciphertext) => Ok(Json(serde_json::json!({ "ciphertext": ciphertext }))),
        None => Err(ApiError::Used),
    }
}

async fn file_upload(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::FileUpload).await?;

    let id = state.files.put(body.to_vec()).await;
    state.totals.increment(Total::FilesCreated);

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn file_download(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::FileDownload).await?;

    match state.files.take(&id).await {
        Some(bytes) => Ok(([(CONTENT_TYPE, "application/octet-stream")], bytes)),
        None => Err(ApiError::Used),
    }
}

#[derive(Deserialize)]
struct InviteCreateRequest {
    #[serde(rename = "inviteId")]
    invite_id: String,
    #[serde(rename = "publicKeyBundle")]
    public_key_bundle: String,
    #[serde(rename = "expiresAt")]
    expires_at: Option<u64>,
}

async fn invite_create(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::ChatInvite).await?;

    let request: InviteCreateRequest = parse_json(&body)?;
    if request.invite_id.is_empty() || request.public_key_bundle.is_empty() {
        return Err(ApiError::BadRequest("invalid_request"));
    }

    match state
        .invites
        .create(
            &request.invite_id,
            request.public_key_bundle,
            request.expires_at,
        )
        .await
    {
        CreateOutcome::Created => {
            state.totals.increment(Total::ChatInvitesCreated);
            Ok((
                StatusCode::CREATED,
                Json(serde_json::json!({ "success": true, "inviteId": request.invite_id })),
            ))
        }
        CreateOutcome::Duplicate => Err(ApiError::DuplicateInvite),
    }
}

async fn invite_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.invites.get(&id).await {
        Some(view) => Ok(Json(serde_json::json!({
            "inviteId": view.invite_id,
            "publicKeyBundle": view.creator_bundle,
            "claimed": view.claimed,
            "claimerBundle": view.claimer_bundle,
        }))),
        None => Err(ApiError::NotFound),
    }
}

#[derive(Deserialize)]
struct InviteClaimRequest {
    #[serde(rename = "claimerBundle")]
    claimer_bundle: String,
}

async fn invite_claim(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::ChatInvite).await?;

    let request: InviteClaimRequest = parse_json(&body)?;
    if request.claimer_bundle.is_empty() {
        return Err(ApiError::BadRequest("invalid_request"));
    }

    match state.invites.claim(&id, request.claimer_bundle).await {
        ClaimOutcome::Claimed { creator_bundle } => Ok(Json(
            serde_json::json!({ "success": true, "creatorBundle": creator_bundle }),
        )),
        ClaimOutcome::AlreadyClaimed => Err(ApiError::AlreadyClaimed),
        ClaimOutcome::Gone => Err(ApiError::NotFound),
    }
}

#[derive(Deserialize)]
struct SendMessageRequest {
    to: String,
    from: Option<String>,
    #[serde(rename = "encryptedMessage")]
    encrypted_message: String,
    #[serde(rename = "messageId")]
    message_id: String,
}

async fn message_send(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    enforce_rate(&state, &headers, addr, RateAction::ChatMessage).await?;

    let request: SendMessageRequest = parse_json(&body)?;
    if request.to.is_empty() || request.encrypted_message.is_empty() || request.message_id.is_empty()
    {
        return Err(ApiError::BadRequest("invalid_request"));
    }

    let from = request.from.unwrap_or_else(|| "anonymous".to_string());

    // Enqueue first: the mailbox is the source of truth and the live push is
    // only an optimization, so a failed push can never lose the message.
    let outcome = state
        .mailboxes
        .enqueue(
            &request.to,
            request.message_id.clone(),
            from.clone(),
            request.encrypted_message.clone(),
        )
        .await;

    match outcome {
        EnqueueOutcome::Stored => {
            state.totals.increment(Total::ChatMessagesSent);

            let frame = serde_json::json!({
                "type": "newMessage",
                "message": {
                    "id": request.message_id,
                    "from": from,
                    "payload": request.encrypted_message,
                },
            });
            let pushed = state.chat_sockets.push(&request.to, frame.to_string()).await;
            if pushed {
                debug!(to = %request.to, id = %request.message_id, "pushed message to live socket");
            }

            Ok((
                StatusCode::CREATED,
                Json(serde_json::json!({ "success": true })),
            ))
        }
        EnqueueOutcome::Duplicate => Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "duplicate": true })),
        )),
    }
}

async fn messages_fetch(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> impl IntoResponse {
    let messages = state.mailboxes.fetch(&fingerprint).await;
    Json(serde_json::json!({ "messages": messages }))
}

#[derive(Deserialize)]
struct AckRequest {
    fingerprint: String,
    #[serde(rename = "messageIds")]
    message_ids: Vec<String>,
}

async fn messages_ack(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: AckRequest = parse_json(&body)?;
    if request.fingerprint.is_empty() {
        return Err(ApiError::BadRequest("invalid_request"));
    }

    state
        .mailboxes
        .ack(&request.fingerprint, &request.message_ids)
        .await;

    Ok(Json(serde_json::json!({ "success": true })))
}
