//! Shared types for the agent prediction market.
//!
//! These types form the data model used across all modules: the store,
//! the trade and resolution engines, and the HTTP API all depend on them
//! without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// The yes/no branch of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// Parse an explicit side token ("yes"/"no", case-insensitive,
    /// surrounding whitespace ignored). Returns None for anything else.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "yes" => Some(Side::Yes),
            "no" => Some(Side::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Market lifecycle status. `Resolved` is terminal; there is no cancel or
/// dispute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Resolved,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(MarketStatus::Open),
            "resolved" => Some(MarketStatus::Resolved),
            _ => None,
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binary prediction market question.
///
/// `option_a` labels the yes side and `option_b` the no side.
/// `initial_yes_price` is fixed at creation and is the sole pricing input —
/// there is no order book or bonding curve. `liquidity` accumulates each
/// trade's stake and feeds the per-trade risk cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: Uuid,
    pub question: String,
    pub description: String,
    pub category: String,
    /// Label of the yes side.
    pub option_a: String,
    /// Label of the no side.
    pub option_b: String,
    /// Fixed YES price in (0, 1) exclusive.
    pub initial_yes_price: f64,
    /// Cumulative stake volume traded in this market.
    pub liquidity: f64,
    pub status: MarketStatus,
    /// Resolved outcome label; set exactly once, equal to option_a or option_b.
    pub outcome: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Market {
    /// The NO price implied by the fixed YES price.
    pub fn no_price(&self) -> f64 {
        1.0 - self.initial_yes_price
    }

    /// Price of the given side.
    pub fn side_price(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.initial_yes_price,
            Side::No => self.no_price(),
        }
    }

    /// Whether the outcome has been set (non-empty after trimming).
    pub fn is_resolved(&self) -> bool {
        self.outcome
            .as_deref()
            .map(|o| !o.trim().is_empty())
            .unwrap_or(false)
    }

    /// Map an outcome/option label to a side, if it matches either label
    /// exactly (after trimming both).
    pub fn side_for_label(&self, label: &str) -> Option<Side> {
        let label = label.trim();
        if label == self.option_a.trim() {
            Some(Side::Yes)
        } else if label == self.option_b.trim() {
            Some(Side::No)
        } else {
            None
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {:.0}¢ | {} {:.0}¢ | vol {:.0} | {})",
            self.question,
            self.option_a,
            self.initial_yes_price * 100.0,
            self.option_b,
            self.no_price() * 100.0,
            self.liquidity,
            self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// An autonomous trading participant, identified by its API key.
///
/// Counters are mutated on every trade (`total_trades`,
/// `total_volume_trade`) and on market resolution (`total_wins`,
/// `total_profit`). Agents are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub agent_name: String,
    /// Secret bearer credential. Returned once at registration.
    pub api_key: String,
    /// Deterministic address derived from the API key.
    pub public_address: String,
    pub total_trades: u64,
    pub total_wins: u64,
    pub total_volume_trade: f64,
    pub total_profit: f64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | trades={} wins={} vol={:.2} pnl={:+.2}",
            self.agent_name,
            self.total_trades,
            self.total_wins,
            self.total_volume_trade,
            self.total_profit,
        )
    }
}

// ---------------------------------------------------------------------------
// Trade & Position
// ---------------------------------------------------------------------------

/// An immutable trade execution record. Append-only; never mutated after
/// insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub market_id: Uuid,
    pub side: Side,
    /// The side's price at trade time (static per market).
    pub price: f64,
    /// shares = stake / price.
    pub shares: f64,
    /// Amount risked.
    pub stake: f64,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} stake={:.2} @ {:.2}¢ → {:.2} shares",
            self.side,
            self.market_id,
            self.stake,
            self.price * 100.0,
            self.shares,
        )
    }
}

/// Per-(agent, market) aggregate holdings. One row per pair; created on an
/// agent's first trade in a market and incremented on every subsequent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub market_id: Uuid,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub last_trade_at: DateTime<Utc>,
}

impl Position {
    /// Shares held on the given side.
    pub fn shares_on(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.yes_shares,
            Side::No => self.no_shares,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} yes={:.2} no={:.2}",
            self.market_id, self.yes_shares, self.no_shares,
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain error taxonomy shared by both engines. The API layer maps each
/// variant to an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Market already resolved")]
    AlreadyResolved,

    #[error("stake is too large for this market")]
    LimitExceeded { max_stake_allowed: f64 },

    #[error("{0}")]
    InternalInvariant(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
