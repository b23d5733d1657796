//! # Fiscal Invoice State Machine
//!
//! Tracks an NFC-e through the tax authority's lifecycle. This module is pure:
//! it decides which transitions are legal and how raw authority statuses map
//! onto them. Talking to the authority lives in `caixa-fiscal`.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  NotSubmitted ──submit──► Processing ──poll──► Authorized               │
//! │       │                    │  │  │                │   ▲                 │
//! │       │ submit failed      │  │  └─► Rejected ────┤   │ cancel refused  │
//! │       ▼                    │  └────► Error ───────┤   │                 │
//! │     Error ◄────────────────┘                      │   │                 │
//! │                                                   ▼   │                 │
//! │  Authorized ──request cancel──► Processing (cancellation pending)       │
//! │                                       │                                 │
//! │                                       └──poll──► Cancelled (terminal)   │
//! │                                                                         │
//! │  Rejected / Error ──resubmit──► Processing (or Error if unreachable)    │
//! │  Rejected / Error ──observed──► Authorized | Cancelled  (reprocessing)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every applied transition yields an [`InvoiceTransition`] that the caller
//! appends to the invoice's event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::FiscalStatus;
use crate::validation::validate_cancellation_reason;

// =============================================================================
// Authority Outcome
// =============================================================================

/// A normalized answer from the fiscal authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthorityOutcome {
    Processing,
    Authorized { document_ref: Option<String> },
    Rejected { reason: String },
    Cancelled,
    Error { message: String },
}

/// Folds accents and separators so `"Em Processamento"` and
/// `"em_processamento"` compare equal.
fn fold_status(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            ' ' | '-' => '_',
            other => other,
        })
        .collect()
}

/// Maps the authority's free-form status vocabulary onto [`AuthorityOutcome`].
///
/// Unrecognised statuses become `Error` carrying the raw text so an operator
/// can see what the authority actually said.
///
/// ## Example
/// ```rust
/// use caixa_core::fiscal::{normalize_status, AuthorityOutcome};
///
/// assert_eq!(normalize_status("Autorizado", None, Some("NFC-123")),
///            AuthorityOutcome::Authorized { document_ref: Some("NFC-123".into()) });
/// assert_eq!(normalize_status("EM PROCESSAMENTO", None, None), AuthorityOutcome::Processing);
/// ```
pub fn normalize_status(
    raw: &str,
    message: Option<&str>,
    document_ref: Option<&str>,
) -> AuthorityOutcome {
    let detail = message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    match fold_status(raw).as_str() {
        "processando" | "processando_autorizacao" | "em_processamento" | "pendente"
        | "aguardando" | "enviado" | "processing" | "pending" => AuthorityOutcome::Processing,
        "autorizado" | "autorizada" | "aprovado" | "aprovada" | "authorized" | "approved" => {
            AuthorityOutcome::Authorized {
                document_ref: document_ref.map(str::to_string),
            }
        }
        "rejeitado" | "rejeitada" | "erro_autorizacao" | "denegado" | "denegada" | "rejected"
        | "denied" => {
            AuthorityOutcome::Rejected {
                reason: detail.unwrap_or_else(|| raw.trim().to_string()),
            }
        }
        "cancelado" | "cancelada" | "cancelamento_homologado" | "cancelled" | "canceled" => {
            AuthorityOutcome::Cancelled
        }
        "erro" | "falha" | "error" | "failed" => AuthorityOutcome::Error {
            message: detail.unwrap_or_else(|| raw.trim().to_string()),
        },
        _ => AuthorityOutcome::Error {
            message: match detail {
                Some(detail) => format!("unrecognised status '{}': {}", raw.trim(), detail),
                None => format!("unrecognised status '{}'", raw.trim()),
            },
        },
    }
}

// =============================================================================
// Transition Record
// =============================================================================

/// One entry of an invoice's append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceTransition {
    pub invoice_id: String,
    pub from: FiscalStatus,
    pub to: FiscalStatus,
    pub message: Option<String>,
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
}

/// Legal `from → to` pairs.
pub fn can_transition(from: FiscalStatus, to: FiscalStatus) -> bool {
    use FiscalStatus::*;
    matches!(
        (from, to),
        (NotSubmitted, Processing)
            | (NotSubmitted, Error)
            | (Processing, Authorized)
            | (Processing, Rejected)
            | (Processing, Error)
            | (Processing, Cancelled)
            | (Authorized, Processing)
            | (Authorized, Cancelled)
            | (Rejected, Processing)
            | (Rejected, Authorized)
            | (Rejected, Error)
            | (Rejected, Cancelled)
            | (Error, Processing)
            | (Error, Authorized)
            | (Error, Cancelled)
    )
}

// =============================================================================
// Fiscal Invoice
// =============================================================================

/// The fiscal document issued for one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FiscalInvoice {
    pub id: String,
    pub settlement_id: String,
    pub status: FiscalStatus,
    /// Authority-side identifier returned on submission.
    pub correlation_id: Option<String>,
    /// Access key / number of the authorized document.
    pub document_ref: Option<String>,
    pub rejection_reason: Option<String>,
    /// Set while a cancellation is pending and kept once cancelled.
    pub cancellation_reason: Option<String>,
    /// Last diagnostic from the authority or transport.
    pub last_message: Option<String>,
    pub attempts: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl FiscalInvoice {
    pub fn new(settlement_id: &str, now: DateTime<Utc>) -> Self {
        FiscalInvoice {
            id: Uuid::new_v4().to_string(),
            settlement_id: settlement_id.to_string(),
            status: FiscalStatus::NotSubmitted,
            correlation_id: None,
            document_ref: None,
            rejection_reason: None,
            cancellation_reason: None,
            last_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Processing because of a cancellation request rather than a submission.
    pub fn is_cancellation_pending(&self) -> bool {
        self.status == FiscalStatus::Processing && self.cancellation_reason.is_some()
    }

    /// Whether a submission would reach the authority. Processing, authorized
    /// and cancelled invoices are never resubmitted.
    pub fn needs_submission(&self) -> bool {
        self.status.accepts_submission()
    }

    fn transition(
        &mut self,
        to: FiscalStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<InvoiceTransition> {
        if !can_transition(self.status, to) {
            return Err(CoreError::invalid_state(
                "fiscal invoice",
                &self.id,
                self.status,
                &format!("move to {}", to),
            ));
        }
        let from = self.status;
        self.status = to;
        self.updated_at = now;
        Ok(InvoiceTransition {
            invoice_id: self.id.clone(),
            from,
            to,
            message,
            at: now,
        })
    }

    /// Records a successful hand-off to the authority.
    pub fn mark_submitted(
        &mut self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<InvoiceTransition> {
        if !self.needs_submission() {
            return Err(CoreError::invalid_state(
                "fiscal invoice",
                &self.id,
                self.status,
                "submit",
            ));
        }
        let transition = self.transition(
            FiscalStatus::Processing,
            Some(format!("submitted as {}", correlation_id)),
            now,
        )?;
        self.correlation_id = Some(correlation_id.to_string());
        self.attempts += 1;
        self.rejection_reason = None;
        self.last_message = None;
        Ok(transition)
    }

    /// Records a submission that never reached the authority.
    ///
    /// Returns `None` when the invoice was already in `Error`; only the
    /// message is refreshed then.
    pub fn mark_submission_failed(
        &mut self,
        message: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<InvoiceTransition>> {
        if !self.needs_submission() {
            return Err(CoreError::invalid_state(
                "fiscal invoice",
                &self.id,
                self.status,
                "record a failed submission",
            ));
        }
        let transition = if self.status == FiscalStatus::Error {
            self.updated_at = now;
            None
        } else {
            Some(self.transition(FiscalStatus::Error, Some(message.to_string()), now)?)
        };
        self.attempts += 1;
        self.last_message = Some(message.to_string());
        Ok(transition)
    }

    /// Validates a cancellation request without changing anything.
    ///
    /// Returns the trimmed reason.
    pub fn check_cancellable(&self, reason: &str) -> CoreResult<String> {
        let reason = validate_cancellation_reason(reason)?;
        if self.status != FiscalStatus::Authorized {
            return Err(CoreError::invalid_state(
                "fiscal invoice",
                &self.id,
                self.status,
                "cancel",
            ));
        }
        Ok(reason)
    }

    /// Moves an authorized invoice into a pending cancellation.
    pub fn request_cancellation(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<InvoiceTransition> {
        let reason = self.check_cancellable(reason)?;
        let transition = self.transition(
            FiscalStatus::Processing,
            Some(format!("cancellation requested: {}", reason)),
            now,
        )?;
        self.cancellation_reason = Some(reason);
        self.last_message = None;
        Ok(transition)
    }

    /// Applies what the authority reported.
    ///
    /// Returns `None` when nothing changed state (still processing, or the
    /// same status observed again).
    ///
    /// While a cancellation is pending, an `Authorized`, `Rejected` or
    /// `Error` answer means the authority refused it: the invoice returns to
    /// `Authorized` with the refusal kept in `last_message`.
    pub fn apply_outcome(
        &mut self,
        outcome: AuthorityOutcome,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<InvoiceTransition>> {
        if self.is_cancellation_pending() {
            return self.apply_cancellation_outcome(outcome, now);
        }

        match outcome {
            AuthorityOutcome::Processing => Ok(None),
            AuthorityOutcome::Authorized { document_ref } => {
                if document_ref.is_some() {
                    self.document_ref = document_ref;
                }
                if self.status == FiscalStatus::Authorized {
                    return Ok(None);
                }
                let transition = self.transition(FiscalStatus::Authorized, None, now)?;
                self.rejection_reason = None;
                self.last_message = None;
                Ok(Some(transition))
            }
            AuthorityOutcome::Rejected { reason } => {
                if self.status == FiscalStatus::Rejected {
                    self.rejection_reason = Some(reason);
                    return Ok(None);
                }
                let transition =
                    self.transition(FiscalStatus::Rejected, Some(reason.clone()), now)?;
                self.rejection_reason = Some(reason);
                Ok(Some(transition))
            }
            AuthorityOutcome::Cancelled => {
                if self.status == FiscalStatus::Cancelled {
                    return Ok(None);
                }
                self.transition(FiscalStatus::Cancelled, None, now).map(Some)
            }
            AuthorityOutcome::Error { message } => {
                self.last_message = Some(message.clone());
                self.updated_at = now;
                if self.status != FiscalStatus::Processing {
                    return Ok(None);
                }
                self.transition(FiscalStatus::Error, Some(message), now)
                    .map(Some)
            }
        }
    }

    fn apply_cancellation_outcome(
        &mut self,
        outcome: AuthorityOutcome,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<InvoiceTransition>> {
        let refusal = match outcome {
            AuthorityOutcome::Processing => return Ok(None),
            AuthorityOutcome::Cancelled => {
                return self.transition(FiscalStatus::Cancelled, None, now).map(Some)
            }
            AuthorityOutcome::Authorized { .. } => "cancellation refused by authority".to_string(),
            AuthorityOutcome::Rejected { reason } => format!("cancellation refused: {}", reason),
            AuthorityOutcome::Error { message } => format!("cancellation failed: {}", message),
        };

        let transition = self.transition(FiscalStatus::Authorized, Some(refusal.clone()), now)?;
        self.cancellation_reason = None;
        self.last_message = Some(refusal);
        Ok(Some(transition))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
