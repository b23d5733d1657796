//! # caixa-till
//!
//! The till's settlement orchestrator: orders, split payments, cash
//! sessions and fiscal issuance behind one [`Till`] value.
//!
//! ## Startup
//! ```rust,ignore
//! let config = TillConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//!
//! let events = ChannelEmitter::default();
//! let till = Till::new(db, &config)?.with_emitter(Arc::new(events.clone()));
//!
//! let session = till.open_session(&operator, Money::from_cents(5000)).await?;
//! ```
//!
//! ## Modules
//! - [`till`] - The orchestrator
//! - [`config`] - `till.toml` + `CAIXA_*` environment
//! - [`events`] - Settlement and invoice notifications
//! - [`error`] - Code + message errors for the front end

pub mod config;
pub mod error;
pub mod events;
mod registry;
pub mod till;

pub use config::{ConfigError, TillConfig};
pub use error::{ErrorCode, TillError, TillResult};
pub use events::{ChannelEmitter, EventEmitter, NoOpEmitter, TillEvent};
pub use till::{SessionSummary, Till};
