//! # Invoice Poller
//!
//! One background task per submitted invoice, re-querying the authority on
//! a fixed interval until the invoice leaves `processing`.
//!
//! ## Task Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  spawn_poll(target, invoice_id, config, emitter) ──► PollHandle         │
//! │                                                                         │
//! │     ┌──────────── every `interval` ────────────┐                        │
//! │     ▼                                          │                        │
//! │  poll_once(invoice_id) ── still processing ────┘                        │
//! │     │                                                                   │
//! │     ├─ settled status ──► emitter.invoice_resolved ──► Resolved         │
//! │     ├─ transport error ─► logged, keep polling                          │
//! │     └─ other error ─────► Failed                                        │
//! │                                                                         │
//! │  handle.stop() / handle dropped ──► Stopped   (in-flight call dropped)  │
//! │  `timeout` elapsed ──► emitter.poll_timed_out ──► TimedOut              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A timeout only ends the loop. It never cancels the invoice.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::FiscalResult;
use crate::issuer::FiscalIssuer;
use caixa_core::{FiscalInvoice, FiscalStatus};

// =============================================================================
// Seams
// =============================================================================

/// Something that can refresh an invoice from the authority.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    async fn poll_once(&self, invoice_id: &str) -> FiscalResult<FiscalInvoice>;
}

#[async_trait]
impl PollTarget for FiscalIssuer {
    async fn poll_once(&self, invoice_id: &str) -> FiscalResult<FiscalInvoice> {
        self.poll_status(invoice_id).await
    }
}

/// Receives the poller's notifications.
pub trait FiscalEventEmitter: Send + Sync {
    fn invoice_resolved(&self, invoice: &FiscalInvoice);

    fn poll_timed_out(&self, invoice_id: &str);
}

/// Emitter that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFiscalEmitter;

impl FiscalEventEmitter for NoOpFiscalEmitter {
    fn invoice_resolved(&self, _invoice: &FiscalInvoice) {}

    fn poll_timed_out(&self, _invoice_id: &str) {}
}

// =============================================================================
// Configuration & Outcome
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Wall-clock ceiling for the whole loop.
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The invoice left `processing`.
    Resolved(FiscalInvoice),
    TimedOut { invoice_id: String },
    Stopped { invoice_id: String },
    Failed { invoice_id: String, error: String },
}

// =============================================================================
// Handle
// =============================================================================

/// Owner's end of a poll task. Dropping it stops the task.
#[derive(Debug)]
pub struct PollHandle {
    invoice_id: String,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn invoice_id(&self) -> &str {
        &self.invoice_id
    }

    /// Signals the task to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task to end and returns how it ended.
    pub async fn outcome(self) -> PollOutcome {
        let PollHandle {
            invoice_id,
            shutdown_tx,
            join,
        } = self;

        let result = join.await;
        drop(shutdown_tx);

        match result {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::Failed {
                invoice_id,
                error: format!("poll task aborted: {}", e),
            },
        }
    }
}

/// Starts polling `invoice_id` in the background.
pub fn spawn_poll(
    target: Arc<dyn PollTarget>,
    invoice_id: &str,
    config: PollerConfig,
    emitter: Arc<dyn FiscalEventEmitter>,
) -> PollHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let id = invoice_id.to_string();

    info!(
        invoice_id = %id,
        interval_ms = config.interval.as_millis() as u64,
        timeout_ms = config.timeout.as_millis() as u64,
        "Starting invoice poll"
    );
    let join = tokio::spawn(run(target, id.clone(), config, emitter, shutdown_rx));

    PollHandle {
        invoice_id: id,
        shutdown_tx,
        join,
    }
}

async fn run(
    target: Arc<dyn PollTarget>,
    invoice_id: String,
    config: PollerConfig,
    emitter: Arc<dyn FiscalEventEmitter>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> PollOutcome {
    let start = Instant::now();
    let deadline = sleep_until(start + config.timeout);
    tokio::pin!(deadline);

    let mut ticker = interval_at(start + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return stopped(invoice_id.clone()),
            _ = &mut deadline => return timed_out(invoice_id.clone(), emitter.as_ref()),
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return stopped(invoice_id.clone()),
            _ = &mut deadline => return timed_out(invoice_id.clone(), emitter.as_ref()),
            result = target.poll_once(&invoice_id) => result,
        };

        match result {
            Ok(invoice) if invoice.status == FiscalStatus::Processing => {
                debug!(invoice_id = %invoice_id, "Invoice still processing");
            }
            Ok(invoice) => {
                info!(invoice_id = %invoice_id, status = %invoice.status, "Invoice resolved");
                emitter.invoice_resolved(&invoice);
                return PollOutcome::Resolved(invoice);
            }
            Err(err) if err.is_retryable() => {
                warn!(invoice_id = %invoice_id, error = %err, "Poll attempt failed, retrying");
            }
            Err(err) => {
                error!(invoice_id = %invoice_id, error = %err, "Invoice poll failed");
                return PollOutcome::Failed {
                    invoice_id,
                    error: err.to_string(),
                };
            }
        }
    }
}

fn stopped(invoice_id: String) -> PollOutcome {
    debug!(invoice_id = %invoice_id, "Invoice poll stopped");
    PollOutcome::Stopped { invoice_id }
}

fn timed_out(invoice_id: String, emitter: &dyn FiscalEventEmitter) -> PollOutcome {
    warn!(invoice_id = %invoice_id, "Invoice poll timed out");
    emitter.poll_timed_out(&invoice_id);
    PollOutcome::TimedOut { invoice_id }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FiscalError;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns scripted statuses; `processing` once the script runs out.
    #[derive(Default)]
    struct ScriptedTarget {
        script: Mutex<VecDeque<FiscalResult<FiscalStatus>>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl ScriptedTarget {
        fn with(script: Vec<FiscalResult<FiscalStatus>>) -> Arc<Self> {
            Arc::new(ScriptedTarget {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(ScriptedTarget {
                hang: true,
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollTarget for ScriptedTarget {
        async fn poll_once(&self, _invoice_id: &str) -> FiscalResult<FiscalInvoice> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let status = next.unwrap_or(Ok(FiscalStatus::Processing))?;
            let mut invoice = FiscalInvoice::new("s-1", Utc::now());
            invoice.status = status;
            Ok(invoice)
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<String>>,
    }

    impl FiscalEventEmitter for RecordingEmitter {
        fn invoice_resolved(&self, invoice: &FiscalInvoice) {
            self.events
                .lock()
                .unwrap()
                .push(format!("resolved:{}", invoice.status));
        }

        fn poll_timed_out(&self, invoice_id: &str) {
            self.events.lock().unwrap().push(format!("timeout:{}", invoice_id));
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_after_processing() {
        let target = ScriptedTarget::with(vec![
            Ok(FiscalStatus::Processing),
            Ok(FiscalStatus::Authorized),
        ]);
        let emitter = Arc::new(RecordingEmitter::default());

        let handle = spawn_poll(target.clone(), "inv-1", config(), emitter.clone());
        let outcome = handle.outcome().await;

        match outcome {
            PollOutcome::Resolved(invoice) => assert_eq!(invoice.status, FiscalStatus::Authorized),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(target.calls(), 2);
        assert_eq!(*emitter.events.lock().unwrap(), vec!["resolved:authorized"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_one_interval() {
        let target = ScriptedTarget::with(vec![]);
        let _handle = spawn_poll(target.clone(), "inv-1", config(), Arc::new(NoOpFiscalEmitter));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(target.calls(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(target.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let target = ScriptedTarget::with(vec![]);
        let emitter = Arc::new(RecordingEmitter::default());

        let outcome = spawn_poll(target.clone(), "inv-1", config(), emitter.clone())
            .outcome()
            .await;

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                invoice_id: "inv-1".to_string()
            }
        );
        // Ticks at 3s, 6s and 9s, deadline at 10s
        assert_eq!(target.calls(), 3);
        assert_eq!(*emitter.events.lock().unwrap(), vec!["timeout:inv-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_keep_polling() {
        let target = ScriptedTarget::with(vec![
            Err(FiscalError::ExternalFailure("502".into())),
            Ok(FiscalStatus::Rejected),
        ]);
        let outcome = spawn_poll(target.clone(), "inv-1", config(), Arc::new(NoOpFiscalEmitter))
            .outcome()
            .await;

        assert!(matches!(outcome, PollOutcome::Resolved(ref i) if i.status == FiscalStatus::Rejected));
        assert_eq!(target.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_ends_loop() {
        let target = ScriptedTarget::with(vec![Err(FiscalError::Config("bad".into()))]);
        let outcome = spawn_poll(target, "inv-1", config(), Arc::new(NoOpFiscalEmitter))
            .outcome()
            .await;
        assert!(matches!(outcome, PollOutcome::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_preempts_in_flight_call() {
        let target = ScriptedTarget::hanging();
        let handle = spawn_poll(target.clone(), "inv-1", config(), Arc::new(NoOpFiscalEmitter));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(target.calls(), 1);

        handle.stop();
        let outcome = handle.outcome().await;
        assert_eq!(
            outcome,
            PollOutcome::Stopped {
                invoice_id: "inv-1".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_task() {
        let target = ScriptedTarget::with(vec![]);
        let handle = spawn_poll(target.clone(), "inv-1", config(), Arc::new(NoOpFiscalEmitter));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(target.calls(), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(target.calls(), 1);
    }
}
