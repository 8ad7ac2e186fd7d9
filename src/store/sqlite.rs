//! SQLite store.
//!
//! Durable `MarketStore` implementation over sqlx. Counter updates are
//! expressed as `SET x = x + ?` so they are atomic at the row level, and
//! the multi-step writes run inside transactions. The resolution commit
//! guards the market transition with a conditional update on `outcome`,
//! which serialises concurrent resolution attempts.
//!
//! Timestamps are stored as RFC 3339 text and ids as UUID text, keeping
//! the schema portable and the row mapping explicit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::types::{Agent, Market, MarketStatus, Position, Side, Trade};

use super::{MarketStore, NewAgent, NewMarket, SettlementDelta, TradeIntent};

/// sqlx-backed `MarketStore`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the given SQLite URL and create the schema if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// An in-memory database for tests. A single connection keeps every
    /// query on the same memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                agent_name TEXT NOT NULL,
                api_key TEXT NOT NULL UNIQUE,
                public_address TEXT NOT NULL,
                total_trades INTEGER NOT NULL DEFAULT 0,
                total_wins INTEGER NOT NULL DEFAULT 0,
                total_volume_trade REAL NOT NULL DEFAULT 0,
                total_profit REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_active_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                option_a TEXT NOT NULL,
                option_b TEXT NOT NULL,
                initial_yes_price REAL NOT NULL,
                liquidity REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'open',
                outcome TEXT,
                end_time TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                shares REAL NOT NULL,
                stake REAL NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                yes_shares REAL NOT NULL DEFAULT 0,
                no_shares REAL NOT NULL DEFAULT 0,
                last_trade_at TEXT NOT NULL,
                UNIQUE(agent_id, market_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_market ON trades(market_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_market ON positions(market_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid uuid in row: {s}"))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in row: {s}"))?
        .with_timezone(&Utc))
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent> {
    let last_active: Option<String> = row.try_get("last_active_at")?;
    Ok(Agent {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        agent_name: row.try_get("agent_name")?,
        api_key: row.try_get("api_key")?,
        public_address: row.try_get("public_address")?,
        total_trades: row.try_get::<i64, _>("total_trades")? as u64,
        total_wins: row.try_get::<i64, _>("total_wins")? as u64,
        total_volume_trade: row.try_get("total_volume_trade")?,
        total_profit: row.try_get("total_profit")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        last_active_at: last_active.as_deref().map(parse_ts).transpose()?,
    })
}

fn market_from_row(row: &SqliteRow) -> Result<Market> {
    let status: String = row.try_get("status")?;
    let Some(status) = MarketStatus::parse(&status) else {
        bail!("Invalid market status in row: {status}");
    };
    let end_time: Option<String> = row.try_get("end_time")?;
    Ok(Market {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        question: row.try_get("question")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        option_a: row.try_get("option_a")?,
        option_b: row.try_get("option_b")?,
        initial_yes_price: row.try_get("initial_yes_price")?,
        liquidity: row.try_get("liquidity")?,
        status,
        outcome: row.try_get("outcome")?,
        end_time: end_time.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let side: String = row.try_get("side")?;
    let Some(side) = Side::from_token(&side) else {
        bail!("Invalid trade side in row: {side}");
    };
    Ok(Trade {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        agent_id: parse_uuid(&row.try_get::<String, _>("agent_id")?)?,
        market_id: parse_uuid(&row.try_get::<String, _>("market_id")?)?,
        side,
        price: row.try_get("price")?,
        shares: row.try_get("shares")?,
        stake: row.try_get("stake")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        agent_id: parse_uuid(&row.try_get::<String, _>("agent_id")?)?,
        market_id: parse_uuid(&row.try_get::<String, _>("market_id")?)?,
        yes_shares: row.try_get("yes_shares")?,
        no_shares: row.try_get("no_shares")?,
        last_trade_at: parse_ts(&row.try_get::<String, _>("last_trade_at")?)?,
    })
}

// ---------------------------------------------------------------------------
// MarketStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketStore for SqliteStore {
    async fn register_agent(&self, agent: NewAgent) -> Result<Agent> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO agents (id, agent_name, api_key, public_address, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(id.to_string())
        .bind(&agent.agent_name)
        .bind(&agent.api_key)
        .bind(&agent.public_address)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert agent")?;

        Ok(Agent {
            id,
            agent_name: agent.agent_name,
            api_key: agent.api_key,
            public_address: agent.public_address,
            total_trades: 0,
            total_wins: 0,
            total_volume_trade: 0.0,
            total_profit: 0.0,
            created_at: now,
            last_active_at: None,
        })
    }

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE api_key = ?1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn touch_agent(&self, agent_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE agents SET last_active_at = ?1 WHERE id = ?2")
            .bind(at.to_rfc3339())
            .bind(agent_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM agents
            ORDER BY total_profit DESC, total_wins DESC,
                     total_volume_trade DESC, created_at ASC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn create_market(&self, market: NewMarket) -> Result<Market> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO markets
                (id, question, description, category, option_a, option_b,
                 initial_yes_price, end_time, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(id.to_string())
        .bind(&market.question)
        .bind(&market.description)
        .bind(&market.category)
        .bind(&market.option_a)
        .bind(&market.option_b)
        .bind(market.initial_yes_price)
        .bind(market.end_time.map(|t| t.to_rfc3339()))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert market")?;

        Ok(Market {
            id,
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
            created_at: now,
        })
    }

    async fn market(&self, id: Uuid) -> Result<Option<Market>> {
        let row = sqlx::query("SELECT * FROM markets WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(market_from_row).transpose()
    }

    async fn list_markets(&self) -> Result<Vec<Market>> {
        let rows = sqlx::query(
            "SELECT * FROM markets WHERE status IN ('open', 'resolved') ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(market_from_row).collect()
    }

    async fn trades_for_market(&self, market_id: Uuid) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE market_id = ?1")
            .bind(market_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn positions_for_market(&self, market_id: Uuid) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE market_id = ?1")
            .bind(market_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn position(&self, agent_id: Uuid, market_id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE agent_id = ?1 AND market_id = ?2")
            .bind(agent_id.to_string())
            .bind(market_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn commit_trade(&self, intent: TradeIntent) -> Result<(Trade, Position)> {
        let now = Utc::now();
        let trade_id = Uuid::new_v4();
        let (yes_inc, no_inc) = match intent.side {
            Side::Yes => (intent.shares, 0.0),
            Side::No => (0.0, intent.shares),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO trades (id, agent_id, market_id, side, price, shares, stake, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(trade_id.to_string())
        .bind(intent.agent_id.to_string())
        .bind(intent.market_id.to_string())
        .bind(intent.side.as_str())
        .bind(intent.price)
        .bind(intent.shares)
        .bind(intent.stake)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert trade")?;

        sqlx::query(
            r#"
            INSERT INTO positions (id, agent_id, market_id, yes_shares, no_shares, last_trade_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(agent_id, market_id) DO UPDATE SET
                yes_shares = yes_shares + excluded.yes_shares,
                no_shares = no_shares + excluded.no_shares,
                last_trade_at = excluded.last_trade_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(intent.agent_id.to_string())
        .bind(intent.market_id.to_string())
        .bind(yes_inc)
        .bind(no_inc)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to upsert position")?;

        let updated = sqlx::query(
            r#"
            UPDATE agents SET
                total_trades = total_trades + 1,
                total_volume_trade = total_volume_trade + ?1,
                last_active_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(intent.stake)
        .bind(now.to_rfc3339())
        .bind(intent.agent_id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            bail!("unknown agent {}", intent.agent_id);
        }

        let updated = sqlx::query("UPDATE markets SET liquidity = liquidity + ?1 WHERE id = ?2")
            .bind(intent.stake)
            .bind(intent.market_id.to_string())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            bail!("unknown market {}", intent.market_id);
        }

        let row = sqlx::query("SELECT * FROM positions WHERE agent_id = ?1 AND market_id = ?2")
            .bind(intent.agent_id.to_string())
            .bind(intent.market_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let position = position_from_row(&row)?;

        tx.commit().await?;

        let trade = Trade {
            id: trade_id,
            agent_id: intent.agent_id,
            market_id: intent.market_id,
            side: intent.side,
            price: intent.price,
            shares: intent.shares,
            stake: intent.stake,
            created_at: now,
        };
        Ok((trade, position))
    }

    async fn commit_resolution(
        &self,
        market_id: Uuid,
        outcome: &str,
        deltas: &[SettlementDelta],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Conditional transition: applies only while the outcome is still
        // empty, so a concurrent resolution cannot settle twice.
        let updated = sqlx::query(
            r#"
            UPDATE markets SET outcome = ?1, status = 'resolved'
            WHERE id = ?2 AND (outcome IS NULL OR TRIM(outcome) = '')
            "#,
        )
        .bind(outcome)
        .bind(market_id.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for delta in deltas {
            sqlx::query(
                r#"
                UPDATE agents SET
                    total_profit = total_profit + ?1,
                    total_wins = total_wins + ?2
                WHERE id = ?3
                "#,
            )
            .bind(delta.profit_delta)
            .bind(delta.win_delta as i64)
            .bind(delta.agent_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn new_agent(name: &str) -> NewAgent {
        NewAgent {
            agent_name: name.to_string(),
            api_key: Uuid::new_v4().to_string(),
            public_address: "0xabc".to_string(),
        }
    }

    fn new_market(yes_price: f64) -> NewMarket {
        NewMarket {
            question: "Test?".to_string(),
            description: String::new(),
            category: "Other".to_string(),
            option_a: "Yes".to_string(),
            option_b: "No".to_string(),
            initial_yes_price: yes_price,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn test_agent_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let agent = store.register_agent(new_agent("alpha")).await.unwrap();

        let found = store.agent_by_api_key(&agent.api_key).await.unwrap().unwrap();
        assert_eq!(found.id, agent.id);
        assert_eq!(found.agent_name, "alpha");
        assert_eq!(found.total_trades, 0);
        assert!(found.last_active_at.is_none());

        assert!(store.agent_by_api_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_api_key_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut a = new_agent("alpha");
        a.api_key = "fixed-key".to_string();
        store.register_agent(a.clone()).await.unwrap();
        a.agent_name = "beta".to_string();
        assert!(store.register_agent(a).await.is_err());
    }

    #[tokio::test]
    async fn test_market_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let market = store.create_market(new_market(0.4)).await.unwrap();

        let found = store.market(market.id).await.unwrap().unwrap();
        assert_eq!(found.status, MarketStatus::Open);
        assert!((found.initial_yes_price - 0.4).abs() < 1e-12);
        assert_eq!(found.liquidity, 0.0);
        assert!(found.outcome.is_none());

        let listed = store.list_markets().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_trade_atomic_updates() {
        let store = SqliteStore::in_memory().await.unwrap();
        let agent = store.register_agent(new_agent("alpha")).await.unwrap();
        let market = store.create_market(new_market(0.4)).await.unwrap();

        let (trade, position) = store
            .commit_trade(TradeIntent {
                agent_id: agent.id,
                market_id: market.id,
                side: Side::Yes,
                price: 0.4,
                shares: 100.0,
                stake: 40.0,
            })
            .await
            .unwrap();
        assert_eq!(trade.side, Side::Yes);
        assert_eq!(position.yes_shares, 100.0);

        // Second trade on the other side goes into the same position row.
        let (_, position) = store
            .commit_trade(TradeIntent {
                agent_id: agent.id,
                market_id: market.id,
                side: Side::No,
                price: 0.6,
                shares: 10.0,
                stake: 6.0,
            })
            .await
            .unwrap();
        assert_eq!(position.yes_shares, 100.0);
        assert_eq!(position.no_shares, 10.0);

        let agent = store.agent_by_api_key(&agent.api_key).await.unwrap().unwrap();
        assert_eq!(agent.total_trades, 2);
        assert!((agent.total_volume_trade - 46.0).abs() < 1e-9);

        let market = store.market(market.id).await.unwrap().unwrap();
        assert!((market.liquidity - 46.0).abs() < 1e-9);

        assert_eq!(store.trades_for_market(market.id).await.unwrap().len(), 2);
        assert_eq!(store.positions_for_market(market.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_trade_unknown_agent_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let market = store.create_market(new_market(0.5)).await.unwrap();

        let result = store
            .commit_trade(TradeIntent {
                agent_id: Uuid::new_v4(),
                market_id: market.id,
                side: Side::Yes,
                price: 0.5,
                shares: 2.0,
                stake: 1.0,
            })
            .await;
        assert!(result.is_err());

        // Nothing leaked out of the aborted transaction.
        assert!(store.trades_for_market(market.id).await.unwrap().is_empty());
        assert!(store.positions_for_market(market.id).await.unwrap().is_empty());
        let market = store.market(market.id).await.unwrap().unwrap();
        assert_eq!(market.liquidity, 0.0);
    }

    #[tokio::test]
    async fn test_commit_resolution_single_shot() {
        let store = SqliteStore::in_memory().await.unwrap();
        let agent = store.register_agent(new_agent("alpha")).await.unwrap();
        let market = store.create_market(new_market(0.4)).await.unwrap();

        let deltas = vec![SettlementDelta {
            agent_id: agent.id,
            profit_delta: 60.0,
            win_delta: 1,
        }];
        assert!(store.commit_resolution(market.id, "Yes", &deltas).await.unwrap());
        assert!(!store.commit_resolution(market.id, "No", &deltas).await.unwrap());

        let agent = store.agent_by_api_key(&agent.api_key).await.unwrap().unwrap();
        assert_eq!(agent.total_wins, 1);
        assert!((agent.total_profit - 60.0).abs() < 1e-9);

        let market = store.market(market.id).await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Resolved);
        assert_eq!(market.outcome.as_deref(), Some("Yes"));
    }

    #[tokio::test]
    async fn test_leaderboard_ordering_and_limit() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.register_agent(new_agent("a")).await.unwrap();
        let b = store.register_agent(new_agent("b")).await.unwrap();
        store.register_agent(new_agent("c")).await.unwrap();
        let market = store.create_market(new_market(0.5)).await.unwrap();

        store
            .commit_resolution(
                market.id,
                "Yes",
                &[
                    SettlementDelta { agent_id: a.id, profit_delta: 10.0, win_delta: 1 },
                    SettlementDelta { agent_id: b.id, profit_delta: 25.0, win_delta: 1 },
                ],
            )
            .await
            .unwrap();

        let board = store.leaderboard(2).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].agent_name, "b");
        assert_eq!(board[1].agent_name, "a");
    }

    #[tokio::test]
    async fn test_touch_agent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let agent = store.register_agent(new_agent("alpha")).await.unwrap();
        let at = Utc::now();
        store.touch_agent(agent.id, at).await.unwrap();
        let found = store.agent_by_api_key(&agent.api_key).await.unwrap().unwrap();
        let touched = found.last_active_at.unwrap();
        assert!((touched - at).num_seconds().abs() < 2);
    }
}
