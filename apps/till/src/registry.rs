//! Running poll tasks, keyed by invoice and tagged with the cash session
//! whose settlement produced the invoice.
//!
//! ```text
//! start(invoice, session) ──► PollHandle stored (earlier one stopped)
//! stop(invoice)           ──► handle.stop(), removed
//! stop_session(session)   ──► every handle of that session stopped
//! stop_all()              ──► shutdown
//! ```
//!
//! Finished handles are pruned whenever a new poll starts. Only the most
//! recently closed sessions are remembered; background issuance for an
//! older session has long finished.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use caixa_fiscal::{spawn_poll, FiscalEventEmitter, PollHandle, PollTarget, PollerConfig};

const CLOSED_SESSIONS_KEPT: usize = 32;

struct TrackedPoll {
    session_id: String,
    handle: PollHandle,
}

#[derive(Default)]
struct RegistryState {
    polls: HashMap<String, TrackedPoll>,
    /// Sessions whose polls were stopped by a close. Background issuance
    /// for them does not start new polls. Oldest first.
    closed_sessions: VecDeque<String>,
    shutting_down: bool,
}

#[derive(Default)]
pub(crate) struct PollRegistry {
    state: Mutex<RegistryState>,
}

impl PollRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts polling the invoice, replacing any earlier poll of it.
    ///
    /// Returns false when nothing was started.
    pub(crate) fn start(
        &self,
        target: Arc<dyn PollTarget>,
        invoice_id: &str,
        session_id: &str,
        config: PollerConfig,
        emitter: Arc<dyn FiscalEventEmitter>,
    ) -> bool {
        let mut state = self.state();
        if state.shutting_down {
            debug!(invoice_id = %invoice_id, "Till shutting down, poll not started");
            return false;
        }

        state.polls.retain(|_, tracked| !tracked.handle.is_finished());
        if let Some(previous) = state.polls.remove(invoice_id) {
            debug!(invoice_id = %invoice_id, "Replacing earlier invoice poll");
            previous.handle.stop();
        }

        let handle = spawn_poll(target, invoice_id, config, emitter);
        state.polls.insert(
            invoice_id.to_string(),
            TrackedPoll {
                session_id: session_id.to_string(),
                handle,
            },
        );
        true
    }

    /// Like [`start`](Self::start), but refuses sessions that were closed.
    pub(crate) fn start_for_open_session(
        &self,
        target: Arc<dyn PollTarget>,
        invoice_id: &str,
        session_id: &str,
        config: PollerConfig,
        emitter: Arc<dyn FiscalEventEmitter>,
    ) -> bool {
        if self.state().closed_sessions.iter().any(|id| id == session_id) {
            debug!(invoice_id = %invoice_id, session_id = %session_id, "Session closed, poll not started");
            return false;
        }
        self.start(target, invoice_id, session_id, config, emitter)
    }

    pub(crate) fn stop(&self, invoice_id: &str) -> bool {
        match self.state().polls.remove(invoice_id) {
            Some(tracked) => {
                tracked.handle.stop();
                debug!(invoice_id = %invoice_id, "Invoice poll stopped");
                true
            }
            None => false,
        }
    }

    /// Stops every poll started for the session. Returns how many were live.
    pub(crate) fn stop_session(&self, session_id: &str) -> usize {
        let mut state = self.state();
        if !state.closed_sessions.iter().any(|id| id == session_id) {
            if state.closed_sessions.len() == CLOSED_SESSIONS_KEPT {
                state.closed_sessions.pop_front();
            }
            state.closed_sessions.push_back(session_id.to_string());
        }

        let ids: Vec<String> = state
            .polls
            .iter()
            .filter(|(_, tracked)| tracked.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut stopped = 0;
        for id in ids {
            if let Some(tracked) = state.polls.remove(&id) {
                if !tracked.handle.is_finished() {
                    stopped += 1;
                }
                tracked.handle.stop();
            }
        }
        if stopped > 0 {
            info!(session_id = %session_id, count = stopped, "Stopped invoice polls for closed session");
        }
        stopped
    }

    pub(crate) fn stop_all(&self) {
        let mut state = self.state();
        state.shutting_down = true;
        for (_, tracked) in state.polls.drain() {
            tracked.handle.stop();
        }
    }

    pub(crate) fn is_polling(&self, invoice_id: &str) -> bool {
        self.state()
            .polls
            .get(invoice_id)
            .map(|tracked| !tracked.handle.is_finished())
            .unwrap_or(false)
    }

    pub(crate) fn active(&self) -> usize {
        self.state()
            .polls
            .values()
            .filter(|tracked| !tracked.handle.is_finished())
            .count()
    }
}
