//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.
//! Failures map the engine error taxonomy to HTTP statuses with a
//! structured `{"error": ...}` body.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::trading::{TradeOutcome, TradeRequest};
use crate::engine::{RegistryEngine, ResolutionEngine, TradeEngine};
use crate::store::{MarketStore, NewMarket};
use crate::types::{Agent, EngineError, Market, Position, Side, Trade};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub store: Arc<dyn MarketStore>,
    pub trading: TradeEngine,
    pub resolution: ResolutionEngine,
    pub registry: RegistryEngine,
}

impl ApiState {
    pub fn new(store: Arc<dyn MarketStore>, config: &AppConfig) -> Self {
        Self {
            trading: TradeEngine::new(
                Arc::clone(&store),
                config.trading.clone(),
                config.onchain_stake_scale(),
            ),
            resolution: ResolutionEngine::new(Arc::clone(&store)),
            registry: RegistryEngine::new(Arc::clone(&store)),
            store,
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// HTTP-facing wrapper around [`EngineError`].
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            EngineError::Unauthorized(_) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": self.0.to_string() }))
            }
            EngineError::NotFound(_) => {
                (StatusCode::NOT_FOUND, json!({ "error": self.0.to_string() }))
            }
            EngineError::InvalidArgument(_)
            | EngineError::InvalidState(_)
            | EngineError::AlreadyResolved => {
                (StatusCode::BAD_REQUEST, json!({ "error": self.0.to_string() }))
            }
            EngineError::LimitExceeded { max_stake_allowed } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": self.0.to_string(),
                    "max_stake_allowed": max_stake_allowed,
                }),
            ),
            EngineError::InternalInvariant(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.0.to_string() }),
            ),
            EngineError::Internal(e) => {
                warn!(error = %e, "Internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Pull the API key from `x-api-key` or a `Authorization: Bearer` header.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(key.to_string());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| {
            let (scheme, rest) = auth.split_once(' ')?;
            if scheme.eq_ignore_ascii_case("bearer") {
                let key = rest.trim();
                (!key.is_empty()).then(|| key.to_string())
            } else {
                None
            }
        })
}

fn missing_api_key() -> ApiError {
    ApiError(EngineError::Unauthorized("Missing API key".to_string()))
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TradeResponse {
    pub trade: Trade,
    pub position: Position,
    pub on_chain_stake: f64,
    pub on_chain_stake_scale: f64,
}

impl From<TradeOutcome> for TradeResponse {
    fn from(outcome: TradeOutcome) -> Self {
        Self {
            trade: outcome.trade,
            position: outcome.position,
            on_chain_stake: outcome.on_chain_stake,
            on_chain_stake_scale: outcome.on_chain_stake_scale,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    pub market_id: Uuid,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub market_id: Uuid,
    pub outcome: String,
    pub winning_side: Side,
    pub updated_agents: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub agent: Agent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMarketRequest {
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub option_a: String,
    pub option_b: String,
    pub initial_yes_price: f64,
    #[serde(default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketResponse {
    pub market: Market,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketsResponse {
    pub markets: Vec<Market>,
}

/// Leaderboard row; credentials are never exposed here.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub rank: usize,
    pub agent_name: String,
    pub total_trades: u64,
    pub total_wins: u64,
    pub total_volume_trade: f64,
    pub total_profit: f64,
    pub last_active_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardResponse {
    pub agents: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Holder {
    pub agent_name: String,
    pub side: Side,
    pub shares: f64,
    /// Share of this side's total shares, in percent.
    pub share_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldersResponse {
    pub holders: Vec<Holder>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/trade
pub async fn post_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TradeRequest>,
) -> Result<(StatusCode, Json<TradeResponse>), ApiError> {
    let api_key = extract_api_key(&headers).ok_or_else(missing_api_key)?;
    let outcome = state.trading.place_trade(&api_key, request).await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// POST /api/resolve
pub async fn post_resolve(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let outcome = state
        .resolution
        .resolve_market(request.market_id, &request.outcome)
        .await?;
    Ok(Json(ResolveResponse {
        market_id: outcome.market_id,
        outcome: outcome.outcome,
        winning_side: outcome.winning_side,
        updated_agents: outcome.updated_agents,
    }))
}

/// POST /api/agents/register
pub async fn post_register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let agent = state.registry.register_agent(&request.agent_name).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { agent })))
}

/// POST /api/markets
pub async fn post_create_market(
    State(state): State<AppState>,
    Json(request): Json<CreateMarketRequest>,
) -> Result<(StatusCode, Json<MarketResponse>), ApiError> {
    let question = request.question.trim().to_string();
    let option_a = request.option_a.trim().to_string();
    let option_b = request.option_b.trim().to_string();
    if question.is_empty() || option_a.is_empty() || option_b.is_empty() {
        return Err(EngineError::InvalidArgument(
            "question, option_a and option_b are required".to_string(),
        )
        .into());
    }
    if !(request.initial_yes_price > 0.0 && request.initial_yes_price < 1.0) {
        return Err(EngineError::InvalidArgument(
            "initial_yes_price must be strictly between 0 and 1".to_string(),
        )
        .into());
    }

    let market = state
        .store
        .create_market(NewMarket {
            question,
            description: request.description,
            category: request.category,
            option_a,
            option_b,
            initial_yes_price: request.initial_yes_price,
            end_time: request.end_time,
        })
        .await
        .map_err(EngineError::Internal)?;
    Ok((StatusCode::CREATED, Json(MarketResponse { market })))
}

/// GET /api/markets
pub async fn get_markets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MarketsResponse>, ApiError> {
    let api_key = extract_api_key(&headers).ok_or_else(missing_api_key)?;
    let agent = state
        .store
        .agent_by_api_key(&api_key)
        .await
        .map_err(EngineError::Internal)?
        .ok_or_else(|| EngineError::Unauthorized("Invalid API key".to_string()))?;

    // Best-effort activity bump; listing still succeeds if this fails.
    if let Err(e) = state.store.touch_agent(agent.id, chrono::Utc::now()).await {
        warn!(agent_id = %agent.id, error = %e, "Failed to update last_active_at");
    }

    let markets = state
        .store
        .list_markets()
        .await
        .map_err(EngineError::Internal)?;
    Ok(Json(MarketsResponse { markets }))
}

const LEADERBOARD_DEFAULT_LIMIT: usize = 50;
const LEADERBOARD_MAX_LIMIT: usize = 200;

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    // Non-numeric limits fall back to the default.
    let limit = params
        .get("limit")
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(|n| (n.max(1) as usize).min(LEADERBOARD_MAX_LIMIT))
        .unwrap_or(LEADERBOARD_DEFAULT_LIMIT);

    let agents = state
        .store
        .leaderboard(limit)
        .await
        .map_err(EngineError::Internal)?;
    let entries = agents
        .into_iter()
        .enumerate()
        .map(|(idx, a)| LeaderboardEntry {
            id: a.id,
            rank: idx + 1,
            agent_name: a.agent_name,
            total_trades: a.total_trades,
            total_wins: a.total_wins,
            total_volume_trade: a.total_volume_trade,
            total_profit: a.total_profit,
            last_active_at: a.last_active_at,
            created_at: a.created_at,
        })
        .collect();
    Ok(Json(LeaderboardResponse { agents: entries }))
}

/// GET /api/markets/holders
pub async fn get_holders(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<HoldersResponse>, ApiError> {
    let market_id = params
        .get("market_id")
        .ok_or_else(|| EngineError::InvalidArgument("market_id is required".to_string()))?;
    let market_id = market_id
        .parse::<Uuid>()
        .map_err(|_| EngineError::InvalidArgument("market_id must be a UUID".to_string()))?;

    let positions = state
        .store
        .positions_for_market(market_id)
        .await
        .map_err(EngineError::Internal)?;

    // One holder row per (agent, side) with a positive balance.
    let mut rows: Vec<(Uuid, Side, f64)> = Vec::new();
    for position in &positions {
        for side in [Side::Yes, Side::No] {
            let shares = position.shares_on(side);
            if shares > 0.0 {
                rows.push((position.agent_id, side, shares));
            }
        }
    }

    let mut names: HashMap<Uuid, String> = HashMap::new();
    for (agent_id, _, _) in &rows {
        if !names.contains_key(agent_id) {
            let name = state
                .store
                .agent(*agent_id)
                .await
                .map_err(EngineError::Internal)?
                .map(|a| a.agent_name)
                .unwrap_or_else(|| "Unknown agent".to_string());
            names.insert(*agent_id, name);
        }
    }

    let total_yes: f64 = rows
        .iter()
        .filter(|(_, side, _)| *side == Side::Yes)
        .map(|(_, _, shares)| shares)
        .sum();
    let total_no: f64 = rows
        .iter()
        .filter(|(_, side, _)| *side == Side::No)
        .map(|(_, _, shares)| shares)
        .sum();

    let holders = rows
        .into_iter()
        .map(|(agent_id, side, shares)| {
            let total = match side {
                Side::Yes => total_yes,
                Side::No => total_no,
            };
            Holder {
                agent_name: names
                    .get(&agent_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown agent".to_string()),
                side,
                shares,
                share_percent: if total > 0.0 { shares / total * 100.0 } else { 0.0 },
            }
        })
        .collect();
    Ok(Json(HoldersResponse { holders }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
