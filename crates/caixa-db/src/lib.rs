//! # caixa-db: Database Layer for Caixa PDV
//!
//! This crate provides database access for the till.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Caixa PDV Data Flow                              │
//! │                                                                         │
//! │  Till::confirm_settlement / FiscalIssuer::poll_status                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                     caixa-db (THIS CRATE)                       │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌──────────────────┐   ┌──────────────┐  │    │
//! │  │   │   Database    │    │  Repositories    │   │  Migrations  │  │    │
//! │  │   │   (pool.rs)   │◄───│ OrderRepository  │   │  (embedded)  │  │    │
//! │  │   │               │    │ SettlementRepo.  │   │ 001_initial  │  │    │
//! │  │   │ SqlitePool    │    │ SessionRepo.     │   │              │  │    │
//! │  │   │               │    │ FiscalInvoiceRepo│   │              │  │    │
//! │  │   └───────────────┘    └──────────────────┘   └──────────────┘  │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (till.toml → [database] path)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use caixa_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("caixa.db")).await?;
//! let order = db.orders().get_by_id(&order_id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig, DbLocation};

pub use repository::fiscal::FiscalInvoiceRepository;
pub use repository::order::OrderRepository;
pub use repository::session::SessionRepository;
pub use repository::settlement::SettlementRepository;
