//! Resolution engine.
//!
//! Settles a market exactly once: maps the outcome label to the winning
//! side, folds the market's full trade history into per-agent profit
//! deltas, credits at most one win per agent from the position snapshot,
//! and commits the stat increments together with the market transition in
//! a single atomic store operation.
//!
//! Profit comes from trades while win credit comes from the current
//! position snapshot: an agent whose position was built and fully exited
//! before resolution earns trade profit but no win credit.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::store::{MarketStore, SettlementDelta};
use crate::types::{EngineError, Position, Side, Trade};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The result of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub market_id: Uuid,
    pub outcome: String,
    pub winning_side: Side,
    /// Number of agents whose stats were updated.
    pub updated_agents: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ResolutionEngine {
    store: Arc<dyn MarketStore>,
}

impl ResolutionEngine {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Settle the market with the given outcome label. Single-shot: a
    /// market with a non-empty outcome fails `AlreadyResolved` without any
    /// mutation, including under concurrent calls.
    pub async fn resolve_market(
        &self,
        market_id: Uuid,
        outcome_label: &str,
    ) -> Result<ResolutionOutcome, EngineError> {
        let outcome_label = outcome_label.trim();
        if outcome_label.is_empty() {
            return Err(EngineError::InvalidArgument(
                "outcome is required".to_string(),
            ));
        }

        let market = self
            .store
            .market(market_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Market".to_string()))?;

        if market.is_resolved() {
            return Err(EngineError::AlreadyResolved);
        }

        let winning_side = market.side_for_label(outcome_label).ok_or_else(|| {
            EngineError::InvalidArgument(
                "Outcome must match option_a or option_b for this market".to_string(),
            )
        })?;

        let trades = self.store.trades_for_market(market_id).await?;
        let positions = self.store.positions_for_market(market_id).await?;
        let deltas = settlement_deltas(&trades, &positions, winning_side);

        let applied = self
            .store
            .commit_resolution(market_id, outcome_label, &deltas)
            .await?;
        if !applied {
            // Lost the race against a concurrent resolution.
            return Err(EngineError::AlreadyResolved);
        }

        info!(
            market_id = %market_id,
            outcome = outcome_label,
            winning_side = %winning_side,
            updated_agents = deltas.len(),
            "Market resolved"
        );

        Ok(ResolutionOutcome {
            market_id,
            outcome: outcome_label.to_string(),
            winning_side,
            updated_agents: deltas.len(),
        })
    }
}

/// Fold trades and positions into per-agent stat increments.
///
/// Each winning-side trade contributes `shares - stake` (a winning share
/// redeems at 1, minus the cost basis); each losing-side trade forfeits
/// its full stake. Trades with a non-finite or non-positive stake are
/// skipped. Win credit is taken from the position snapshot: one per agent
/// holding shares on the winning side, regardless of trade count. Agents
/// whose aggregate comes out to zero are dropped.
pub fn settlement_deltas(
    trades: &[Trade],
    positions: &[Position],
    winning_side: Side,
) -> Vec<SettlementDelta> {
    let mut by_agent: HashMap<Uuid, (f64, u64)> = HashMap::new();

    for trade in trades {
        if !trade.stake.is_finite() || !trade.shares.is_finite() || trade.stake <= 0.0 {
            continue;
        }
        let profit = if trade.side == winning_side {
            trade.shares - trade.stake
        } else {
            -trade.stake
        };
        by_agent.entry(trade.agent_id).or_default().0 += profit;
    }

    for position in positions {
        if position.shares_on(winning_side) > 0.0 {
            by_agent.entry(position.agent_id).or_default().1 += 1;
        }
    }

    let mut deltas: Vec<SettlementDelta> = by_agent
        .into_iter()
        .filter(|(_, (profit, wins))| *profit != 0.0 || *wins > 0)
        .map(|(agent_id, (profit_delta, win_delta))| SettlementDelta {
            agent_id,
            profit_delta,
            win_delta,
        })
        .collect();
    // Deterministic commit order.
    deltas.sort_by_key(|d| d.agent_id);
    deltas
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
