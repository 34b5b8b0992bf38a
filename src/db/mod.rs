//! Database persistence for everything that must survive a restart.
//!
//! Stores:
//! - Training examples (append-only)
//! - Trade audit log
//! - Scheduler last-run timestamp
//! - Ledger snapshot for crash recovery
//! - Equity curve for P&L tracking

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Trade, TradeAction, TrainingExample};
use crate::trading::{ExampleStore, LedgerSnapshot, LedgerStatus};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored training example row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredExample {
    symbol: String,
    features: String,
    label: i64,
    profit: Option<String>,
    created_at: String,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    id: String,
    action: String,
    symbol: String,
    price: String,
    amount: i64,
    profit: Option<String>,
    reason: Option<String>,
    confidence: Option<f64>,
    time: String,
}

/// Equity curve point for tracking P&L over time.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EquityPoint {
    pub id: i64,
    pub timestamp: String,
    pub equity: f64,
    pub cash: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp {}", raw))?
        .with_timezone(&Utc))
}

fn parse_decimal(raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|s| Decimal::from_str(&s).with_context(|| format!("Invalid decimal {}", s)))
        .transpose()
}

impl TryFrom<StoredExample> for TrainingExample {
    type Error = anyhow::Error;

    fn try_from(row: StoredExample) -> Result<Self> {
        Ok(Self {
            features: serde_json::from_str(&row.features).context("Invalid feature JSON")?,
            label: u8::from(row.label != 0),
            symbol: row.symbol,
            profit: parse_decimal(row.profit)?,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

impl TryFrom<StoredTrade> for Trade {
    type Error = anyhow::Error;

    fn try_from(row: StoredTrade) -> Result<Self> {
        Ok(Self {
            action: TradeAction::parse(&row.action)
                .with_context(|| format!("Unknown trade action {}", row.action))?,
            price: Decimal::from_str(&row.price).context("Invalid trade price")?,
            amount: u32::try_from(row.amount).context("Invalid trade amount")?,
            profit: parse_decimal(row.profit)?,
            time: parse_time(&row.time)?,
            id: row.id,
            symbol: row.symbol,
            reason: row.reason,
            confidence: row.confidence,
        })
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database (one connection so every query sees the same data).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Training examples
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_examples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL DEFAULT '',
                features TEXT NOT NULL,
                label INTEGER NOT NULL CHECK (label IN (0, 1)),
                profit TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Normalization ranges the stored examples were built with
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                normalization TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Trade audit log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                action TEXT NOT NULL,
                symbol TEXT NOT NULL,
                price TEXT NOT NULL,
                amount INTEGER NOT NULL,
                profit TEXT,
                reason TEXT,
                confidence REAL,
                time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;

        // Scheduler state
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_run_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Ledger snapshot
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Equity curve
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                equity REAL NOT NULL,
                cash REAL NOT NULL,
                unrealized_pnl REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Training Examples ====================

    /// Append one training example.
    pub async fn save_example(&self, example: &TrainingExample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_examples (symbol, features, label, profit, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&example.symbol)
        .bind(serde_json::to_string(&example.features)?)
        .bind(i64::from(example.label))
        .bind(example.profit.map(|p| p.to_string()))
        .bind(example.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save training example")?;

        Ok(())
    }

    /// All stored examples in insertion order.
    pub async fn get_examples(&self) -> Result<Vec<TrainingExample>> {
        let rows = sqlx::query_as::<_, StoredExample>(
            "SELECT symbol, features, label, profit, created_at FROM training_examples ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch training examples")?;

        rows.into_iter().map(TrainingExample::try_from).collect()
    }

    pub async fn count_examples(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM training_examples")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ==================== Trades ====================

    /// Append trades to the audit log. Already-recorded ids are ignored.
    pub async fn save_trades(&self, trades: &[Trade]) -> Result<()> {
        for trade in trades {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO trades
                    (id, action, symbol, price, amount, profit, reason, confidence, time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&trade.id)
            .bind(trade.action.as_str())
            .bind(&trade.symbol)
            .bind(trade.price.to_string())
            .bind(i64::from(trade.amount))
            .bind(trade.profit.map(|p| p.to_string()))
            .bind(&trade.reason)
            .bind(trade.confidence)
            .bind(trade.time.to_rfc3339())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to save trade {}", trade.id))?;
        }

        Ok(())
    }

    /// Most recent trades, oldest first.
    pub async fn get_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT id, action, symbol, price, amount, profit, reason, confidence, time
            FROM (SELECT * FROM trades ORDER BY seq DESC LIMIT ?)
            ORDER BY seq
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        rows.into_iter().map(Trade::try_from).collect()
    }

    /// Fingerprint of the normalization ranges behind the stored examples.
    pub async fn get_normalization(&self) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT normalization FROM training_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(raw,)| raw))
    }

    pub async fn set_normalization(&self, fingerprint: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_meta (id, normalization, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                normalization = excluded.normalization,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(fingerprint)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save normalization fingerprint")?;

        Ok(())
    }

    // ==================== Scheduler State ====================

    pub async fn get_last_run(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT last_run_at FROM scheduler_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(raw,)| parse_time(&raw)).transpose()
    }

    pub async fn set_last_run(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_state (id, last_run_at) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET last_run_at = excluded.last_run_at
            "#,
        )
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save last run time")?;

        Ok(())
    }

    // ==================== Ledger Snapshot ====================

    pub async fn save_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_snapshot (id, snapshot, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(serde_json::to_string(snapshot)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save ledger snapshot")?;

        Ok(())
    }

    pub async fn load_ledger(&self) -> Result<Option<LedgerSnapshot>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT snapshot FROM ledger_snapshot WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(raw,)| serde_json::from_str(&raw).context("Invalid ledger snapshot"))
            .transpose()
    }

    // ==================== Equity Curve ====================

    /// Record an equity curve point.
    pub async fn record_equity_point(&self, status: &LedgerStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_curve (timestamp, equity, cash, unrealized_pnl, realized_pnl)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.equity.to_f64().unwrap_or(0.0))
        .bind(status.cash.to_f64().unwrap_or(0.0))
        .bind(status.unrealized_pnl.to_f64().unwrap_or(0.0))
        .bind(status.realized_pnl.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent equity curve points, newest first.
    pub async fn get_equity_curve(&self, limit: i64) -> Result<Vec<EquityPoint>> {
        sqlx::query_as::<_, EquityPoint>("SELECT * FROM equity_curve ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch equity curve")
    }
}

#[async_trait]
impl ExampleStore for Database {
    async fn append_example(&self, example: &TrainingExample) -> Result<()> {
        self.save_example(example).await
    }

    async fn load_examples(&self) -> Result<Vec<TrainingExample>> {
        self.get_examples().await
    }
}
