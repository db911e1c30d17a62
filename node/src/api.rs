//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the governance engine over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                          | Description                       |
//! |--------|-------------------------------|-----------------------------------|
//! | GET    | `/health`                     | Liveness probe                    |
//! | POST   | `/vaults`                     | Create a vault                    |
//! | GET    | `/vaults/:id`                 | Vault by id                       |
//! | POST   | `/vaults/:id/members`         | Add a member                      |
//! | DELETE | `/vaults/:id/members/:user`   | Remove a member                   |
//! | POST   | `/vaults/:id/deposits`        | Deposit into a vault              |
//! | GET    | `/vaults/:id/transactions`    | Vault history                     |
//! | POST   | `/vaults/:id/withdrawals`     | Submit a withdrawal request       |
//! | GET    | `/vaults/:id/withdrawals`     | Requests of a vault               |
//! | GET    | `/withdrawals/:id`            | Request by id                     |
//! | POST   | `/withdrawals/:id/votes`      | Cast a vote                       |
//! | GET    | `/withdrawals/:id/votes`      | Votes on a request                |
//! | GET    | `/accounts/:id`               | Destination account               |
//! | GET    | `/ws`                         | WebSocket notification stream     |
//!
//! There is no authentication layer: the acting user is named in the
//! request body.
//!
//! The engine is synchronous and talks to sled, so every engine call runs
//! on the blocking pool.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tontine_protocol::governance::{
    Account, Amount, CastVote, GovernanceEngine, GovernanceError, Member, RequestStatus,
    SubmitWithdrawal, Vault, VaultTransaction, Vote, VoteReceipt, WithdrawalReceipt,
    WithdrawalRequest, WithdrawalRule,
};

use crate::error::ApiError;
use crate::metrics::SharedMetrics;
use crate::notify::NodeEvent;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The governance engine.
    pub engine: Arc<GovernanceEngine>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Broadcast channel feeding WebSocket subscribers.
    pub event_tx: broadcast::Sender<NodeEvent>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/vaults", post(create_vault_handler))
        .route("/vaults/:id", get(vault_handler))
        .route("/vaults/:id/members", post(add_member_handler))
        .route("/vaults/:id/members/:user", delete(remove_member_handler))
        .route("/vaults/:id/deposits", post(deposit_handler))
        .route("/vaults/:id/transactions", get(vault_transactions_handler))
        .route(
            "/vaults/:id/withdrawals",
            post(submit_withdrawal_handler).get(vault_withdrawals_handler),
        )
        .route("/withdrawals/:id", get(withdrawal_handler))
        .route(
            "/withdrawals/:id/votes",
            post(cast_vote_handler).get(votes_handler),
        )
        .route("/accounts/:id", get(account_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request Bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateVaultBody {
    pub name: String,
    pub creator_id: String,
    pub withdrawal_rule: WithdrawalRule,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberBody {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DepositBody {
    pub user_id: String,
    pub amount: Amount,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitWithdrawalBody {
    pub requester_id: String,
    pub amount: Amount,
    pub reason: String,
    #[serde(default)]
    pub destination_account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteBody {
    pub member_id: String,
    /// `true` for yes.
    pub vote: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Runs an engine call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, GovernanceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// Malformed JSON bodies answer with the API's own error shape.
fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Counts the outcome of a settlement-capable operation.
fn record_resolution(
    metrics: &SharedMetrics,
    status: RequestStatus,
    settlement: &Option<VaultTransaction>,
    vault_closed: bool,
) {
    match status {
        RequestStatus::Approved => metrics.requests_approved_total.inc(),
        RequestStatus::Rejected => metrics.requests_rejected_total.inc(),
        RequestStatus::Pending => {}
    }
    if settlement.is_some() {
        metrics.settlements_total.inc();
    }
    if vault_closed {
        metrics.vaults_closed_total.inc();
    }
}

/// A settlement failure still commits a rejection.
fn record_failure(metrics: &SharedMetrics, err: &ApiError) {
    if let ApiError::Governance(GovernanceError::InsufficientFunds { .. }) = err {
        metrics.settlement_failures_total.inc();
        metrics.requests_rejected_total.inc();
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "version": state.version })),
    )
}

/// `POST /vaults` — creates a vault with the caller as first member.
async fn create_vault_handler(
    State(state): State<AppState>,
    body: Result<Json<CreateVaultBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Vault>), ApiError> {
    let body = parse_body(body)?;
    let engine = Arc::clone(&state.engine);
    let vault = blocking(move || {
        engine.create_vault(&body.name, &body.creator_id, body.withdrawal_rule)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(vault)))
}

/// `GET /vaults/:id`
async fn vault_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vault>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(blocking(move || engine.vault(&id)).await?))
}

/// `POST /vaults/:id/members`
async fn add_member_handler(
    Path(vault_id): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<AddMemberBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Member>), ApiError> {
    let body = parse_body(body)?;
    let engine = Arc::clone(&state.engine);
    let member = blocking(move || engine.add_member(&vault_id, &body.user_id)).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// `DELETE /vaults/:id/members/:user`
async fn remove_member_handler(
    Path((vault_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Member>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(
        blocking(move || engine.remove_member(&vault_id, &user_id)).await?,
    ))
}

/// `POST /vaults/:id/deposits`
async fn deposit_handler(
    Path(vault_id): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<DepositBody>, JsonRejection>,
) -> Result<(StatusCode, Json<VaultTransaction>), ApiError> {
    let body = parse_body(body)?;
    let engine = Arc::clone(&state.engine);
    let entry = blocking(move || {
        let description = body.description.unwrap_or_else(|| "Deposit".to_string());
        engine.deposit(&vault_id, &body.user_id, body.amount, &description)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `GET /vaults/:id/transactions` — history in append order.
async fn vault_transactions_handler(
    Path(vault_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<VaultTransaction>>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(
        blocking(move || engine.transactions_for_vault(&vault_id)).await?,
    ))
}

/// `POST /vaults/:id/withdrawals` — submits a withdrawal request.
///
/// Returns 201 with the request, which is already `approved` (and settled)
/// under `creator_only`.
async fn submit_withdrawal_handler(
    Path(vault_id): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<SubmitWithdrawalBody>, JsonRejection>,
) -> Result<(StatusCode, Json<WithdrawalReceipt>), ApiError> {
    let body = parse_body(body)?;
    let _timer = state.metrics.operation_latency_seconds.start_timer();
    let engine = Arc::clone(&state.engine);
    let result = blocking(move || {
        engine.submit_withdrawal(SubmitWithdrawal {
            vault_id,
            requester_id: body.requester_id,
            amount: body.amount,
            reason: body.reason,
            destination_account_id: body.destination_account_id,
        })
    })
    .await;

    match result {
        Ok(receipt) => {
            state.metrics.withdrawals_submitted_total.inc();
            record_resolution(
                &state.metrics,
                receipt.status(),
                &receipt.settlement,
                receipt.vault_closed,
            );
            Ok((StatusCode::CREATED, Json(receipt)))
        }
        Err(err) => {
            record_failure(&state.metrics, &err);
            Err(err)
        }
    }
}

/// `GET /vaults/:id/withdrawals`
async fn vault_withdrawals_handler(
    Path(vault_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<WithdrawalRequest>>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(
        blocking(move || engine.requests_for_vault(&vault_id)).await?,
    ))
}

/// `GET /withdrawals/:id`
async fn withdrawal_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WithdrawalRequest>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(blocking(move || engine.request(&id)).await?))
}

/// `POST /withdrawals/:id/votes` — casts a vote.
///
/// If this vote approves the request, the response already carries the
/// settlement entry.
async fn cast_vote_handler(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<CastVoteBody>, JsonRejection>,
) -> Result<Json<VoteReceipt>, ApiError> {
    let body = parse_body(body)?;
    let _timer = state.metrics.operation_latency_seconds.start_timer();
    let engine = Arc::clone(&state.engine);
    let result = blocking(move || {
        engine.cast_vote(CastVote {
            request_id,
            member_id: body.member_id,
            approve: body.vote,
            comment: body.comment,
        })
    })
    .await;

    match result {
        Ok(receipt) => {
            state.metrics.votes_cast_total.inc();
            record_resolution(
                &state.metrics,
                receipt.status,
                &receipt.settlement,
                receipt.vault_closed,
            );
            Ok(Json(receipt))
        }
        Err(err) => {
            if matches!(err, ApiError::Governance(GovernanceError::InsufficientFunds { .. })) {
                // The vote itself was recorded.
                state.metrics.votes_cast_total.inc();
            }
            record_failure(&state.metrics, &err);
            Err(err)
        }
    }
}

/// `GET /withdrawals/:id/votes`
async fn votes_handler(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Vote>>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(
        blocking(move || engine.votes_for_request(&request_id)).await?,
    ))
}

/// `GET /accounts/:id` — destination account balance.
async fn account_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Account>, ApiError> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(blocking(move || engine.account(&id)).await?))
}

/// `GET /ws` — WebSocket upgrade for live notifications.
///
/// Clients receive JSON-encoded [`NodeEvent`] messages. The connection is
/// read-only from the server's perspective; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            // Client disconnected.
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {
                        // Client messages are ignored — this is a push-only channel.
                    }
                    _ => break, // Disconnected or error.
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
