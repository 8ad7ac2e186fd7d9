//! In-memory store.
//!
//! Deterministic `MarketStore` implementation with no external
//! dependencies. All state lives behind a single mutex, which makes the
//! multi-step writes trivially atomic. Used by unit and API tests and for
//! local development without a database.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::types::{Agent, Market, MarketStatus, Position, Side, Trade};

use super::{MarketStore, NewAgent, NewMarket, SettlementDelta, TradeIntent};

#[derive(Default)]
struct Inner {
    agents: HashMap<Uuid, Agent>,
    markets: HashMap<Uuid, Market>,
    trades: Vec<Trade>,
    positions: HashMap<(Uuid, Uuid), Position>,
}

/// In-memory `MarketStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of trades recorded (test helper).
    pub fn trade_count(&self) -> usize {
        self.inner.lock().unwrap().trades.len()
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn register_agent(&self, agent: NewAgent) -> Result<Agent> {
        let mut inner = self.inner.lock().unwrap();
        if inner.agents.values().any(|a| a.api_key == agent.api_key) {
            bail!("duplicate api_key");
        }
        let record = Agent {
            id: Uuid::new_v4(),
            agent_name: agent.agent_name,
            api_key: agent.api_key,
            public_address: agent.public_address,
            total_trades: 0,
            total_wins: 0,
            total_volume_trade: 0.0,
            total_profit: 0.0,
            created_at: Utc::now(),
            last_active_at: None,
        };
        inner.agents.insert(record.id, record.clone());
        Ok(record)
    }

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.agents.get(&id).cloned())
    }

    async fn agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.agents.values().find(|a| a.api_key == api_key).cloned())
    }

    async fn touch_agent(&self, agent_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(agent) = inner.agents.get_mut(&agent_id) {
            agent.last_active_at = Some(at);
        }
        Ok(())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<Agent>> {
        let inner = self.inner.lock().unwrap();
        let mut agents: Vec<Agent> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| {
            b.total_profit
                .total_cmp(&a.total_profit)
                .then(b.total_wins.cmp(&a.total_wins))
                .then(b.total_volume_trade.total_cmp(&a.total_volume_trade))
                .then(a.created_at.cmp(&b.created_at))
        });
        agents.truncate(limit);
        Ok(agents)
    }

    async fn create_market(&self, market: NewMarket) -> Result<Market> {
        let mut inner = self.inner.lock().unwrap();
        let record = Market {
            id: Uuid::new_v4(),
            question: market.question,
            description: market.description,
            category: market.category,
            option_a: market.option_a,
            option_b: market.option_b,
            initial_yes_price: market.initial_yes_price,
            liquidity: 0.0,
            status: MarketStatus::Open,
            outcome: None,
            end_time: market.end_time,
            created_at: Utc::now(),
        };
        inner.markets.insert(record.id, record.clone());
        Ok(record)
    }

    async fn market(&self, id: Uuid) -> Result<Option<Market>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.markets.get(&id).cloned())
    }

    async fn list_markets(&self) -> Result<Vec<Market>> {
        let inner = self.inner.lock().unwrap();
        let mut markets: Vec<Market> = inner.markets.values().cloned().collect();
        markets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(markets)
    }

    async fn trades_for_market(&self, market_id: Uuid) -> Result<Vec<Trade>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trades
            .iter()
            .filter(|t| t.market_id == market_id)
            .cloned()
            .collect())
    }

    async fn positions_for_market(&self, market_id: Uuid) -> Result<Vec<Position>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .positions
            .values()
            .filter(|p| p.market_id == market_id)
            .cloned()
            .collect())
    }

    async fn position(&self, agent_id: Uuid, market_id: Uuid) -> Result<Option<Position>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.positions.get(&(agent_id, market_id)).cloned())
    }

    async fn commit_trade(&self, intent: TradeIntent) -> Result<(Trade, Position)> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();

        if !inner.agents.contains_key(&intent.agent_id) {
            bail!("unknown agent {}", intent.agent_id);
        }
        if !inner.markets.contains_key(&intent.market_id) {
            bail!("unknown market {}", intent.market_id);
        }

        let trade = Trade {
            id: Uuid::new_v4(),
            agent_id: intent.agent_id,
            market_id: intent.market_id,
            side: intent.side,
            price: intent.price,
            shares: intent.shares,
            stake: intent.stake,
            created_at: now,
        };
        inner.trades.push(trade.clone());

        let position = inner
            .positions
            .entry((intent.agent_id, intent.market_id))
            .or_insert_with(|| Position {
                id: Uuid::new_v4(),
                agent_id: intent.agent_id,
                market_id: intent.market_id,
                yes_shares: 0.0,
                no_shares: 0.0,
                last_trade_at: now,
            });
        match intent.side {
            Side::Yes => position.yes_shares += intent.shares,
            Side::No => position.no_shares += intent.shares,
        }
        position.last_trade_at = now;
        let position = position.clone();

        // Unwraps guarded by the existence checks above; inner is still locked.
        let agent = inner.agents.get_mut(&intent.agent_id).unwrap();
        agent.total_trades += 1;
        agent.total_volume_trade += intent.stake;
        agent.last_active_at = Some(now);

        let market = inner.markets.get_mut(&intent.market_id).unwrap();
        market.liquidity += intent.stake;

        Ok((trade, position))
    }

    async fn commit_resolution(
        &self,
        market_id: Uuid,
        outcome: &str,
        deltas: &[SettlementDelta],
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        let Some(market) = inner.markets.get_mut(&market_id) else {
            bail!("unknown market {market_id}");
        };
        if market.is_resolved() {
            return Ok(false);
        }
        market.outcome = Some(outcome.to_string());
        market.status = MarketStatus::Resolved;

        for delta in deltas {
            if let Some(agent) = inner.agents.get_mut(&delta.agent_id) {
                agent.total_profit += delta.profit_delta;
                agent.total_wins += delta.win_delta;
            }
        }

        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
