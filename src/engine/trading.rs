//! Pricing & trade engine.
//!
//! Executes one trade against a market's fixed price: validates the
//! request, derives the side price from `initial_yes_price`, enforces the
//! liquidity-relative stake cap, and commits the trade atomically through
//! the store. The full validation pass completes before the first write.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TradingConfig;
use crate::store::{MarketStore, TradeIntent};
use crate::types::{EngineError, Market, Position, Side, Trade};

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// One trade request, as received from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRequest {
    pub market_id: Uuid,
    /// Explicit side token ("yes"/"no"), takes precedence over `option`.
    pub side: Option<String>,
    /// Option label matched against the market's option_a/option_b.
    pub option: Option<String>,
    pub stake: f64,
}

/// The durable records produced by a trade, plus the on-chain mirroring
/// values echoed back to the caller.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub trade: Trade,
    pub position: Position,
    pub on_chain_stake: f64,
    pub on_chain_stake_scale: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct TradeEngine {
    store: Arc<dyn MarketStore>,
    config: TradingConfig,
    on_chain_stake_scale: f64,
}

impl TradeEngine {
    pub fn new(store: Arc<dyn MarketStore>, config: TradingConfig, on_chain_stake_scale: f64) -> Self {
        // Non-positive scales fall back to the identity, matching the
        // config resolution path.
        let on_chain_stake_scale = if on_chain_stake_scale > 0.0 && on_chain_stake_scale.is_finite()
        {
            on_chain_stake_scale
        } else {
            1.0
        };
        Self {
            store,
            config,
            on_chain_stake_scale,
        }
    }

    /// Execute one trade on behalf of the agent holding `api_key`.
    pub async fn place_trade(
        &self,
        api_key: &str,
        request: TradeRequest,
    ) -> Result<TradeOutcome, EngineError> {
        let agent = self
            .store
            .agent_by_api_key(api_key)
            .await?
            .ok_or_else(|| EngineError::Unauthorized("Invalid API key".to_string()))?;

        if !request.stake.is_finite() || request.stake <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "stake must be a positive number".to_string(),
            ));
        }

        let market = self
            .store
            .market(request.market_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Market".to_string()))?;

        if market.status != crate::types::MarketStatus::Open {
            return Err(EngineError::InvalidState(
                "Market is not open for trading".to_string(),
            ));
        }

        let side = resolve_side(&request, &market)?;

        let yes_price = market.initial_yes_price;
        if !yes_price.is_finite() || yes_price <= 0.0 || yes_price >= 1.0 {
            warn!(market_id = %market.id, yes_price, "Corrupt market pricing");
            return Err(EngineError::InternalInvariant(
                "Invalid market pricing".to_string(),
            ));
        }
        let price = market.side_price(side);
        if !price.is_finite() || price <= 0.0 || price >= 1.0 {
            return Err(EngineError::InternalInvariant(
                "Invalid side price".to_string(),
            ));
        }

        let max_stake_allowed = self.max_stake(price, market.liquidity);
        if request.stake > max_stake_allowed {
            return Err(EngineError::LimitExceeded { max_stake_allowed });
        }

        let shares = request.stake / price;

        let (trade, position) = self
            .store
            .commit_trade(TradeIntent {
                agent_id: agent.id,
                market_id: market.id,
                side,
                price,
                shares,
                stake: request.stake,
            })
            .await?;

        info!(
            agent = %agent.agent_name,
            market_id = %market.id,
            side = %side,
            stake = request.stake,
            price,
            shares,
            "Trade executed"
        );

        Ok(TradeOutcome {
            trade,
            position,
            on_chain_stake: request.stake * self.on_chain_stake_scale,
            on_chain_stake_scale: self.on_chain_stake_scale,
        })
    }

    /// The per-trade stake ceiling: liquidity-relative when the market has
    /// depth, the absolute ceiling otherwise, never above the absolute
    /// ceiling. Substitutes for an order book by bounding a single trade's
    /// notional exposure relative to existing depth.
    fn max_stake(&self, price: f64, liquidity: f64) -> f64 {
        let volume_based = if liquidity > 0.0 {
            price * liquidity * self.config.max_payout_multiple
        } else {
            self.config.absolute_max_stake
        };
        volume_based.min(self.config.absolute_max_stake)
    }
}

/// Resolve the traded side: an explicit yes/no token wins; otherwise the
/// option label must match one of the market's labels exactly.
fn resolve_side(request: &TradeRequest, market: &Market) -> Result<Side, EngineError> {
    if let Some(token) = request.side.as_deref() {
        if let Some(side) = Side::from_token(token) {
            return Ok(side);
        }
    }
    if let Some(label) = request.option.as_deref() {
        if !label.trim().is_empty() {
            return match market.side_for_label(label) {
                Some(side) => Ok(side),
                None => Err(EngineError::InvalidArgument(
                    "option must match option_a or option_b for this market".to_string(),
                )),
            };
        }
    }
    Err(EngineError::InvalidArgument(
        "You must provide either side ('yes'/'no') or a valid option label".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
