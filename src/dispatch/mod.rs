//! Due-message selection and delivery with outcome recording.
//!
//! [`DispatchEngine::run_once`] is one dispatch run: select every `pending`
//! message whose time has passed (evaluated against a single snapshot taken
//! at the start of the run), deliver each sequentially, and record the
//! outcome with a compare-and-swap status transition. Per-message failures
//! never abort the run; only a failed due-query does.
//!
//! The engine is indifferent to its driver: [`run_loop`](DispatchEngine::run_loop)
//! is the built-in fixed-interval one, but `run_once` can equally be invoked
//! from the CLI or an external cron.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::delivery::DeliveryClient;
use crate::store::{MessageStatus, MessageStore, StoreError};

/// Outcome counts for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    /// Messages selected as due and given a delivery attempt.
    pub attempted: usize,
    /// Attempts that delivered successfully.
    pub sent: usize,
    /// Attempts that failed delivery.
    pub failed: usize,
}

/// Errors from the single-message dispatch path.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Store lookup or update failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The message has already left `pending`.
    #[error("message {id} is already {status:?}")]
    NotPending {
        /// Message id.
        id: i64,
        /// Its terminal status.
        status: MessageStatus,
    },
}

/// The scheduled-message dispatch engine.
///
/// Collaborators are injected as trait objects so tests can substitute
/// in-memory fakes.
pub struct DispatchEngine {
    store: Arc<dyn MessageStore>,
    delivery: Arc<dyn DeliveryClient>,
    /// Serializes runs: overlapping invocations queue instead of
    /// double-selecting the same due messages.
    run_guard: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine").finish_non_exhaustive()
    }
}

impl DispatchEngine {
    /// Create an engine over the given store and delivery client.
    pub fn new(store: Arc<dyn MessageStore>, delivery: Arc<dyn DeliveryClient>) -> Self {
        Self {
            store,
            delivery,
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Execute one dispatch run.
    ///
    /// Selects due messages against a `now` snapshot taken once at the start,
    /// then processes them sequentially in ascending `scheduled_time` order.
    /// A successful send transitions the message to `sent`, a failed one to
    /// `failed`. When the status write itself fails the message stays
    /// `pending` and will be re-selected next run — an accepted at-least-once
    /// duplication risk, logged loudly rather than swallowed.
    ///
    /// # Errors
    ///
    /// Only a failure of the due-message query aborts the run (zero attempts
    /// reported to the caller via the error).
    pub async fn run_once(&self) -> Result<ProcessingReport, StoreError> {
        let _flight = self.run_guard.lock().await;

        let now = Utc::now();
        let due = self.store.find_due(now).await.map_err(|e| {
            error!(error = %e, "due-message query failed, aborting run");
            e
        })?;

        info!(count = due.len(), now = %now, "dispatch run selected due messages");

        let mut report = ProcessingReport::default();
        for message in due {
            report.attempted += 1;
            match self.delivery.send(&message.body, &message.channel).await {
                Ok(()) => {
                    report.sent += 1;
                    info!(id = message.id, channel = %message.channel, "message sent");
                    self.record_outcome(message.id, MessageStatus::Sent).await;
                }
                Err(e) => {
                    report.failed += 1;
                    error!(id = message.id, channel = %message.channel, error = %e, "message delivery failed");
                    self.record_outcome(message.id, MessageStatus::Failed).await;
                }
            }
        }

        info!(
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            "dispatch run complete"
        );
        Ok(report)
    }

    /// Dispatch a single message immediately, ignoring its scheduled time.
    ///
    /// Same send-and-transition logic as a run, for the manual "send now"
    /// action.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotPending`] when the message already has a
    /// terminal status, or a store error.
    pub async fn dispatch_one(&self, id: i64) -> Result<MessageStatus, DispatchError> {
        let _flight = self.run_guard.lock().await;

        let message = self.store.get(id).await?;
        if message.status.is_terminal() {
            return Err(DispatchError::NotPending {
                id,
                status: message.status,
            });
        }

        let outcome = match self.delivery.send(&message.body, &message.channel).await {
            Ok(()) => {
                info!(id, channel = %message.channel, "message sent");
                MessageStatus::Sent
            }
            Err(e) => {
                error!(id, channel = %message.channel, error = %e, "message delivery failed");
                MessageStatus::Failed
            }
        };

        if !self.store.transition(id, outcome).await? {
            return Err(DispatchError::NotPending {
                id,
                status: self.store.get(id).await?.status,
            });
        }
        Ok(outcome)
    }

    /// Record a delivery outcome, containing persistence failures.
    async fn record_outcome(&self, id: i64, outcome: MessageStatus) {
        match self.store.transition(id, outcome).await {
            Ok(true) => {}
            Ok(false) => {
                // Lost the CAS: another driver already claimed this message.
                warn!(id, ?outcome, "message already transitioned by a concurrent run");
            }
            Err(e) => {
                error!(
                    id,
                    ?outcome,
                    error = %e,
                    "failed to persist outcome; message stays pending and may be re-sent next run"
                );
            }
        }
    }

    /// Drive `run_once` on a fixed interval until `shutdown` fires.
    ///
    /// Run errors are logged; the next tick retries naturally. A tick that
    /// lands while the previous run is still in flight waits on the run
    /// guard rather than overlapping it.
    pub async fn run_loop(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = period.as_secs(), "dispatch loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "dispatch run failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("dispatch loop stopping");
                    break;
                }
            }
        }
    }
}
