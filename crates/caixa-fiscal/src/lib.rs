//! # caixa-fiscal
//!
//! NFC-e issuance for the till: the authority contract, its HTTP adapter,
//! the issuer that keeps stored invoices in step with the authority, and the
//! background poll tasks.
//!
//! ## Usage
//! ```rust,ignore
//! let authority = Arc::new(HttpFiscalAuthority::new(&settings)?);
//! let issuer = Arc::new(FiscalIssuer::new(db.clone(), authority));
//!
//! let invoice = issuer.submit(&settlement).await?;
//! let handle = spawn_poll(issuer.clone(), &invoice.id, settings.poller_config(), emitter);
//! ```

pub mod authority;
pub mod config;
pub mod error;
pub mod http;
pub mod issuer;
pub mod locks;
pub mod poller;

pub use authority::{AuthorityStatus, FiscalAuthority, InvoicePayload};
pub use config::FiscalSettings;
pub use error::{FiscalError, FiscalResult};
pub use http::HttpFiscalAuthority;
pub use issuer::{BatchResult, FiscalIssuer};
pub use locks::KeyedLocks;
pub use poller::{
    spawn_poll, FiscalEventEmitter, NoOpFiscalEmitter, PollHandle, PollOutcome, PollTarget,
    PollerConfig,
};
