//! # Repository Module
//!
//! Database repository implementations for Caixa PDV.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Till orchestrator                                                      │
//! │       │                                                                 │
//! │       │  db.settlements().record(&settlement, &order, Some(&invoice))   │
//! │       ▼                                                                 │
//! │  SettlementRepository                                                   │
//! │  ├── record(...)          one transaction, four tables                  │
//! │  ├── get_by_id(...)                                                     │
//! │  └── list_by_session(...)                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are read into private `*Row` structs and converted into the
//! `caixa-core` types; JSON columns hold item snapshots and frozen reports.
//!
//! ## Available Repositories
//!
//! - [`order::OrderRepository`] - Open tabs
//! - [`settlement::SettlementRepository`] - Confirmed settlements and payments
//! - [`session::SessionRepository`] - Cash sessions and movements
//! - [`fiscal::FiscalInvoiceRepository`] - Fiscal invoices and their event log

pub mod fiscal;
pub mod order;
pub mod session;
pub mod settlement;
