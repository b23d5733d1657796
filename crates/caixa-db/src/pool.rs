//! # Till Database Handle
//!
//! One SQLite file per terminal, shared by the operator's requests and the
//! background invoice polls.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  confirm_settlement ──► BEGIN … settlements, payments, orders,          │
//! │                          fiscal_invoices … COMMIT      (writer)         │
//! │                                                                         │
//! │  invoice poll task  ──► SELECT / UPDATE fiscal_invoices (short writes)  │
//! │                                                                         │
//! │  WAL journal: readers never wait on the writer.                         │
//! │  busy_timeout: a second writer waits instead of failing with BUSY.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::DbResult;
use crate::migrations::{self, MigrationStatus};
use crate::repository::fiscal::FiscalInvoiceRepository;
use crate::repository::order::OrderRepository;
use crate::repository::session::SessionRepository;
use crate::repository::settlement::SettlementRepository;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// Private to a single connection, gone when it closes.
    Memory,
}

/// How to open the till's database.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/caixa/till.db").pool_size(4);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,
    pub pool_size: u32,
    /// How long a request waits for a free connection.
    pub acquire_timeout: Duration,
    /// How long a write waits on SQLite's lock held by another writer.
    pub busy_timeout: Duration,
    pub migrate_on_connect: bool,
}

impl DbConfig {
    /// A file-backed database, created on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: DbLocation::File(path.into()),
            pool_size: 4,
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
            migrate_on_connect: true,
        }
    }

    /// A throwaway database for tests.
    ///
    /// The pool holds exactly one connection, since every connection would
    /// otherwise see its own empty database. Never keep a transaction open
    /// while calling another repository.
    pub fn in_memory() -> Self {
        DbConfig {
            location: DbLocation::Memory,
            pool_size: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            migrate_on_connect: true,
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn migrate_on_connect(mut self, migrate: bool) -> Self {
        self.migrate_on_connect = migrate;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.location {
            DbLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            DbLocation::Memory => SqliteConnectOptions::new()
                .in_memory(true)
                .journal_mode(SqliteJournalMode::Memory),
        };
        options.foreign_keys(true).busy_timeout(self.busy_timeout)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Cloneable handle over the pool. Repositories are cheap and built per call:
///
/// ```rust,ignore
/// let order = db.orders().get_by_id(&order_id).await?;
/// let settlements = db.settlements().list_by_session(&session_id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless turned off, brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            // An in-memory database dies with its last connection.
            .idle_timeout(match config.location {
                DbLocation::Memory => None,
                DbLocation::File(_) => Some(Duration::from_secs(600)),
            })
            .max_lifetime(None)
            .connect_with(config.connect_options())
            .await?;

        info!(location = ?config.location, pool_size = config.pool_size, "Database opened");

        let db = Database { pool };
        if config.migrate_on_connect {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    pub async fn migration_status(&self) -> DbResult<MigrationStatus> {
        migrations::migration_status(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn settlements(&self) -> SettlementRepository {
        SettlementRepository::new(self.pool.clone())
    }

    pub fn sessions(&self) -> SessionRepository {
        SessionRepository::new(self.pool.clone())
    }

    pub fn invoices(&self) -> FiscalInvoiceRepository {
        FiscalInvoiceRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn is_reachable(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
