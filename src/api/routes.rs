//! API route handlers.
//!
//! All endpoints return JSON. Failures are rendered as
//! `{"error": <message>, "kind": <error kind>}` with a status code per kind.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::game::GameService;
use crate::storage::{password_digest, Accounts};
use crate::types::{CellState, MinesError, OwnerId, RoundId, RoundView};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub game: GameService,
    pub accounts: Arc<dyn Accounts>,
    /// Balance granted on registration.
    pub initial_balance: Decimal,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub bet_amount: Decimal,
    pub mine_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRequest {
    pub game_id: RoundId,
    pub position: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    pub game_id: RoundId,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: OwnerId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: OwnerId,
    pub username: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub game_id: RoundId,
    pub balance: Decimal,
    pub game: RoundView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealResponse {
    pub result: CellState,
    pub position: usize,
    pub multiplier: f64,
    pub revealed_count: u8,
    pub game: RoundView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutResponse {
    pub win_amount: Decimal,
    pub balance: Decimal,
    pub game: RoundView,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl IntoResponse for MinesError {
    fn into_response(self) -> Response {
        let status = match &self {
            MinesError::InsufficientFunds { .. }
            | MinesError::InvalidParameters(_)
            | MinesError::UsernameTaken(_) => StatusCode::BAD_REQUEST,
            MinesError::NotFound(_) => StatusCode::NOT_FOUND,
            MinesError::InvalidMove(_)
            | MinesError::NothingToCashOut
            | MinesError::Conflict { .. } => StatusCode::CONFLICT,
            MinesError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MinesError::AdapterFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            MinesError::AdapterFailure { .. } => {
                error!(error = %self, "Request failed on a storage adapter");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: message,
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, MinesError>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve the caller from the `Authorization` header.
/// Accepts a bare token or `Bearer <token>`.
async fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<OwnerId, MinesError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MinesError::Unauthorized("no token provided".into()))?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();

    state
        .accounts
        .resolve_session(token)
        .await?
        .ok_or_else(|| MinesError::Unauthorized("invalid session token".into()))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, MinesError> {
    payload
        .map(|Json(v)| v)
        .map_err(|r| MinesError::InvalidParameters(r.body_text()))
}

fn credentials(creds: Credentials) -> Result<(String, SecretString), MinesError> {
    let username = creds.username.trim().to_string();
    if username.is_empty() || creds.password.is_empty() {
        return Err(MinesError::InvalidParameters(
            "username and password are required".into(),
        ));
    }
    Ok((username, SecretString::new(creds.password)))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), MinesError> {
    let (username, password) = credentials(body(payload)?)?;
    let digest = password_digest(&username, &password);
    let account = state
        .accounts
        .register(&username, &digest, state.initial_balance)
        .await?;
    info!(user_id = %account.id, username = %account.username, "Account registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user_id: account.id,
        }),
    ))
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let (username, password) = credentials(body(payload)?)?;
    let digest = password_digest(&username, &password);
    let account = state
        .accounts
        .authenticate(&username, &digest)
        .await?
        .ok_or_else(|| MinesError::Unauthorized("invalid credentials".into()))?;
    let token = state.accounts.issue_session(account.id).await?;
    info!(user_id = %account.id, "Session issued");

    Ok(Json(LoginResponse {
        token,
        username: account.username,
        balance: account.balance,
    }))
}

/// GET /me
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<MeResponse> {
    let owner = authorize(&state, &headers).await?;
    let account = state.accounts.account(owner).await?;
    Ok(Json(MeResponse {
        user_id: account.id,
        username: account.username,
        balance: account.balance,
    }))
}

/// POST /game/start
pub async fn start_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<StartResponse> {
    let owner = authorize(&state, &headers).await?;
    let req = body(payload)?;
    let mine_count = u8::try_from(req.mine_count).map_err(|_| {
        MinesError::InvalidParameters(format!("mine count out of range: {}", req.mine_count))
    })?;

    let receipt = state.game.start(owner, req.bet_amount, mine_count).await?;
    Ok(Json(StartResponse {
        game_id: receipt.round.game_id,
        balance: receipt.balance,
        game: receipt.round,
    }))
}

/// POST /game/reveal
pub async fn reveal(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RevealRequest>, JsonRejection>,
) -> ApiResult<RevealResponse> {
    let owner = authorize(&state, &headers).await?;
    let req = body(payload)?;
    let outcome = state.game.reveal(owner, req.game_id, req.position).await?;
    Ok(Json(RevealResponse {
        result: outcome.cell,
        position: outcome.position,
        multiplier: outcome.multiplier,
        revealed_count: outcome.revealed_safe_count,
        game: outcome.round,
    }))
}

/// POST /game/cashout
pub async fn cashout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CashoutRequest>, JsonRejection>,
) -> ApiResult<CashoutResponse> {
    let owner = authorize(&state, &headers).await?;
    let req = body(payload)?;
    let receipt = state.game.cashout(owner, req.game_id).await?;
    Ok(Json(CashoutResponse {
        win_amount: receipt.payout,
        balance: receipt.balance,
        game: receipt.round,
    }))
}

/// GET /game/:id
pub async fn get_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<RoundView> {
    let owner = authorize(&state, &headers).await?;
    let Path(round_id) = id.map_err(|r| MinesError::InvalidParameters(r.body_text()))?;
    Ok(Json(state.game.get_state(owner, round_id).await?))
}

/// GET /games?limit=n
pub async fn list_games(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<RoundView>> {
    let owner = authorize(&state, &headers).await?;
    let Query(q) = query.map_err(|r| MinesError::InvalidParameters(r.body_text()))?;
    let limit = q.limit.unwrap_or(20);
    Ok(Json(state.game.history(owner, limit).await?))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
