//! # Settlement Poller
//!
//! The background driver of the settlement engine.
//!
//! ## Poll Cycle
//!
//! ```text
//! SettlementPoller (background task)
//!              │
//!              ├── Every POLL_INTERVAL_SECS: one cycle
//!              │     ├── pending payments            → track, then sweep if terminal
//!              │     ├── payments owed a sweep        → sweep again
//!              │     └── first and every COLD_SWEEP_EVERY-th cycle:
//!              │           completed/expired payments → sweep leftovers
//!              │
//!              └── Next tick only after every task of the cycle finished
//! ```
//!
//! Each payment runs in its own task. An error, or even a panic, in one
//! payment is logged and never stops the others. A payment id stays in
//! the in-flight set while its task runs, so no two tasks ever race on the
//! same outputs.
//!
//! A terminal payment whose sweep failed stays in the owed set and is
//! retried every cycle until a sweep goes out or nothing is left to sweep.
//! A payment whose stored key cannot be decrypted is quarantined: its
//! sweeps are never attempted again by this process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ConfirmationTracker, SettlementError, SharedStore, SweepBuilder, SweepOutcome,
    WebhookNotifier,
};
use crate::db::{PaymentRecord, PaymentStatus};

type IdSet = Arc<Mutex<HashSet<Uuid>>>;

fn lock(set: &IdSet) -> MutexGuard<'_, HashSet<Uuid>> {
    set.lock().unwrap_or_else(|p| p.into_inner())
}

/// Marks a payment as being processed; removed again on drop.
struct InFlightGuard {
    set: IdSet,
    id: Uuid,
}

impl InFlightGuard {
    fn acquire(set: &IdSet, id: Uuid) -> Option<Self> {
        let inserted = lock(set).insert(id);
        inserted.then(|| Self {
            set: set.clone(),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.id);
    }
}

/// What happened to one payment during a cycle.
///
/// A failed sweep does not hide a status change made earlier in the
/// same cycle.
#[derive(Debug)]
pub struct PaymentOutcome {
    /// Status change made by this cycle, if any.
    pub transitioned: Option<PaymentStatus>,
    /// Sweep result; `None` while the payment is still pending, quarantined
    /// or when the sweep failed.
    pub sweep: Option<SweepOutcome>,
    /// Why the sweep failed, if it did.
    pub sweep_error: Option<SettlementError>,
}

impl PaymentOutcome {
    fn unswept(transitioned: Option<PaymentStatus>) -> Self {
        Self {
            transitioned,
            sweep: None,
            sweep_error: None,
        }
    }
}

/// Stored key material is unusable; retrying the same blob cannot succeed.
fn is_key_failure(e: &SettlementError) -> bool {
    matches!(e, SettlementError::Decryption | SettlementError::KeyVault(_))
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub completed: usize,
    pub expired: usize,
    pub swept: usize,
}

/// Drives confirmation tracking and sweeping for every open payment.
///
/// ## Usage
///
/// ```rust,ignore
/// let poller = SettlementPoller::new(store, tracker, sweeper, webhook, 10, 360);
///
/// // Start polling (runs forever)
/// tokio::spawn(async move {
///     poller.start().await;
/// });
/// ```
#[derive(Clone)]
pub struct SettlementPoller {
    store: SharedStore,
    tracker: ConfirmationTracker,
    sweeper: SweepBuilder,
    webhook: Option<WebhookNotifier>,
    poll_interval: Duration,
    cold_sweep_every: u64,
    in_flight: IdSet,
    /// Terminal payments whose last sweep attempt failed.
    sweep_owed: IdSet,
    /// Payments whose key failed to decrypt; never swept again.
    quarantined: IdSet,
}

impl SettlementPoller {
    /// Create a new SettlementPoller.
    ///
    /// ## Arguments
    ///
    /// * `store` - Payment store
    /// * `tracker` - Completion / expiry decisions
    /// * `sweeper` - Builds and broadcasts sweeps
    /// * `webhook` - Optional completion notifier
    /// * `poll_interval_secs` - Seconds between cycles
    /// * `cold_sweep_every` - Revisit settled payments every N cycles
    pub fn new(
        store: SharedStore,
        tracker: ConfirmationTracker,
        sweeper: SweepBuilder,
        webhook: Option<WebhookNotifier>,
        poll_interval_secs: u64,
        cold_sweep_every: u64,
    ) -> Self {
        Self {
            store,
            tracker,
            sweeper,
            webhook,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            cold_sweep_every: cold_sweep_every.max(1),
            in_flight: IdSet::default(),
            sweep_owed: IdSet::default(),
            quarantined: IdSet::default(),
        }
    }

    /// Start the polling loop. Never returns.
    pub async fn start(&self) {
        info!(
            "Starting Settlement Poller (every {}s, cold sweep every {} cycles)",
            self.poll_interval.as_secs(),
            self.cold_sweep_every
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: u64 = 0;

        loop {
            ticker.tick().await;
            cycle = cycle.wrapping_add(1);

            let report = self.run_cycle(cycle).await;
            if report.processed > 0 || report.failed > 0 {
                info!(cycle, ?report, "Poll cycle finished");
            } else {
                debug!(cycle, "Poll cycle finished, nothing to do");
            }
        }
    }

    /// Run one poll cycle and wait for every payment task to finish.
    pub async fn run_cycle(&self, cycle: u64) -> CycleReport {
        let mut report = CycleReport::default();

        let mut payments = match self.store.list_open_payments().await {
            Ok(payments) => payments,
            Err(e) => {
                error!("Failed to list open payments: {}", e);
                return report;
            }
        };

        // The owed set lives in memory, so the first cycle after a restart
        // revisits every settled payment as well
        if cycle == 1 || cycle % self.cold_sweep_every == 0 {
            match self.store.list_settled_payments().await {
                Ok(settled) => {
                    debug!(cycle, count = settled.len(), "Cold sweep of settled payments");
                    payments.extend(settled);
                }
                Err(e) => error!("Failed to list settled payments: {}", e),
            }
        }

        self.load_owed(&mut payments).await;

        let now = Utc::now();
        let mut tasks = Vec::with_capacity(payments.len());

        for payment in payments {
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, payment.id) else {
                debug!(payment_id = %payment.id, "Payment still in flight, skipping");
                report.skipped += 1;
                continue;
            };

            let poller = self.clone();
            let id = payment.id;
            let task = tokio::spawn(async move {
                let _guard = guard;
                poller.process_payment(payment, now).await
            });
            tasks.push((id, task));
        }

        for (id, task) in tasks {
            report.processed += 1;
            match task.await {
                Ok(Ok(outcome)) => {
                    match outcome.transitioned {
                        Some(PaymentStatus::Completed) => report.completed += 1,
                        Some(PaymentStatus::Expired) => report.expired += 1,
                        _ => {}
                    }
                    if let Some(SweepOutcome::Broadcast { .. }) = outcome.sweep {
                        report.swept += 1;
                    }
                    if let Some(e) = &outcome.sweep_error {
                        report.failed += 1;
                        log_payment_error(id, e);
                    }
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    log_payment_error(id, &e);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(payment_id = %id, "Payment task aborted: {}", e);
                }
            }
        }

        report
    }

    /// Track and, once terminal, sweep a single payment.
    pub async fn process_payment(
        &self,
        payment: PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, SettlementError> {
        let mut status = payment.status;
        let transitioned = self.tracker.evaluate(&payment, now).await?;

        if let Some(new_status) = transitioned {
            status = new_status;
            if new_status == PaymentStatus::Completed {
                self.notify_completed(&payment).await;
            }
        }

        if !status.is_terminal() {
            return Ok(PaymentOutcome::unswept(transitioned));
        }

        if lock(&self.quarantined).contains(&payment.id) {
            debug!(payment_id = %payment.id, "Payment key quarantined, not sweeping");
            return Ok(PaymentOutcome::unswept(transitioned));
        }

        match self.sweeper.sweep(&payment).await {
            Ok(sweep) => {
                lock(&self.sweep_owed).remove(&payment.id);
                Ok(PaymentOutcome {
                    transitioned,
                    sweep: Some(sweep),
                    sweep_error: None,
                })
            }
            Err(e) => {
                if is_key_failure(&e) {
                    lock(&self.sweep_owed).remove(&payment.id);
                    lock(&self.quarantined).insert(payment.id);
                } else {
                    lock(&self.sweep_owed).insert(payment.id);
                }
                Ok(PaymentOutcome {
                    transitioned,
                    sweep: None,
                    sweep_error: Some(e),
                })
            }
        }
    }

    /// Add payments owed a sweep that are not already in this cycle's list.
    async fn load_owed(&self, payments: &mut Vec<PaymentRecord>) {
        let listed: HashSet<Uuid> = payments.iter().map(|p| p.id).collect();
        let owed: Vec<Uuid> = lock(&self.sweep_owed)
            .iter()
            .filter(|id| !listed.contains(id))
            .copied()
            .collect();

        for id in owed {
            match self.store.get_payment(id).await {
                Ok(Some(payment)) => payments.push(payment),
                Ok(None) => {
                    lock(&self.sweep_owed).remove(&id);
                }
                Err(e) => error!(payment_id = %id, "Failed to load payment owed a sweep: {}", e),
            }
        }
    }

    /// Fire the completion webhook in the background.
    async fn notify_completed(&self, payment: &PaymentRecord) {
        let Some(notifier) = self.webhook.clone() else {
            return;
        };

        let record = match self.store.get_payment(payment.id).await {
            Ok(Some(record)) => record,
            Ok(None) => payment.clone(),
            Err(e) => {
                warn!(payment_id = %payment.id, "Reloading payment for webhook failed: {}", e);
                payment.clone()
            }
        };

        tokio::spawn(async move {
            if let Err(e) = notifier.notify_completed(&record).await {
                warn!(payment_id = %record.id, "Completion webhook failed: {}", e);
            }
        });
    }
}

fn log_payment_error(id: Uuid, e: &SettlementError) {
    match e {
        SettlementError::ChainUnavailable(_) => {
            warn!(payment_id = %id, "Chain unavailable, retrying next cycle: {}", e)
        }
        SettlementError::Decryption => {
            error!(target: "security", payment_id = %id, "Payment key failed authentication, payment quarantined")
        }
        SettlementError::BroadcastRejected(_) => {
            warn!(payment_id = %id, "{}; retrying next cycle", e)
        }
        _ => error!(payment_id = %id, "Payment processing failed: {}", e),
    }
}
