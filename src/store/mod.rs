//! Data store collaborator.
//!
//! Defines the `MarketStore` trait over the four entity collections
//! (agents, markets, trades, positions) and provides two implementations:
//! - `MemoryStore` — in-memory, used by tests and local development
//! - `SqliteStore` — sqlx-backed durable store
//!
//! Multi-step writes (trade commit, resolution commit) are single trait
//! methods so each implementation can make them atomic: concurrent trades
//! on the same market or (agent, market) pair must not lose counter
//! updates, and a resolution must never leave the market transitioned
//! without the agent stats applied.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Agent, Market, Position, Side, Trade};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Write payloads
// ---------------------------------------------------------------------------

/// A new agent row, produced by the registry.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub agent_name: String,
    pub api_key: String,
    pub public_address: String,
}

/// A new market row, produced by the admin create endpoint.
#[derive(Debug, Clone)]
pub struct NewMarket {
    pub question: String,
    pub description: String,
    pub category: String,
    pub option_a: String,
    pub option_b: String,
    pub initial_yes_price: f64,
    pub end_time: Option<DateTime<Utc>>,
}

/// A fully validated trade ready to be committed.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub agent_id: Uuid,
    pub market_id: Uuid,
    pub side: Side,
    pub price: f64,
    pub shares: f64,
    pub stake: f64,
}

/// Per-agent stat increments computed by the resolution engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementDelta {
    pub agent_id: Uuid,
    pub profit_delta: f64,
    pub win_delta: u64,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over the durable store backing both engines.
#[async_trait]
pub trait MarketStore: Send + Sync {
    // -- agents --

    async fn register_agent(&self, agent: NewAgent) -> Result<Agent>;

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>>;

    async fn agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>>;

    /// Best-effort `last_active_at` bump. Callers may ignore failures.
    async fn touch_agent(&self, agent_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Agents ordered by profit desc, wins desc, volume desc, created asc.
    async fn leaderboard(&self, limit: usize) -> Result<Vec<Agent>>;

    // -- markets --

    async fn create_market(&self, market: NewMarket) -> Result<Market>;

    async fn market(&self, id: Uuid) -> Result<Option<Market>>;

    /// Open and resolved markets, newest first.
    async fn list_markets(&self) -> Result<Vec<Market>>;

    // -- trades & positions --

    async fn trades_for_market(&self, market_id: Uuid) -> Result<Vec<Trade>>;

    async fn positions_for_market(&self, market_id: Uuid) -> Result<Vec<Position>>;

    async fn position(&self, agent_id: Uuid, market_id: Uuid) -> Result<Option<Position>>;

    // -- multi-step writes --

    /// Atomically record one trade: insert the trade row, upsert the
    /// (agent, market) position incrementing only the traded side, bump the
    /// agent's trade count / volume / last-active, and add the stake to the
    /// market's liquidity. All increments are per-row atomic.
    async fn commit_trade(&self, intent: TradeIntent) -> Result<(Trade, Position)>;

    /// Atomically settle a market: transition it to resolved with the given
    /// outcome (only if its outcome is still empty) and apply the per-agent
    /// stat increments in the same transaction. Returns `false` without
    /// mutating anything if another resolution won the race.
    async fn commit_resolution(
        &self,
        market_id: Uuid,
        outcome: &str,
        deltas: &[SettlementDelta],
    ) -> Result<bool>;
}
