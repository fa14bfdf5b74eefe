//! Order Reconciliation: periodic comparison of local OMS/ledger state
//! against the broker's view, plus the per-order retry/stale-cancel sweep.
//!
//! Two cadences, both driven by the engine's scheduler:
//! - **Full scan** (default 30s): [`Reconciler::full_scan`] — runs
//!   [`ntx_reconcile::reconcile_monotonic`] against a fresh broker snapshot.
//!   Any drift immediately disarms the system (`ArmState::reconcile_disarm`)
//!   and persists both the disarm and a `DIRTY` checkpoint.
//! - **Retry tick** (default 5s): [`Reconciler::retry_tick`] — walks orders
//!   still sitting in `PLACED`/`Open` and applies
//!   [`ntx_reconcile::next_action`]'s backoff schedule.
//!
//! A checkpoint row is the only thing `arm_preflight` (outside this crate)
//! accepts as proof of a clean reconcile — a bare audit event does not
//! satisfy the gate, so every scan that completes writes one regardless of
//! verdict.

use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use ntx_integrity::ArmState;
use ntx_reconcile::{
    next_action, reconcile_monotonic, BrokerSnapshot, CancelReason, LocalSnapshot, ReconcileReport,
    RetryAction, SnapshotWatermark,
};

fn report_hash(report: &ReconcileReport) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{report:?}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of a full reconcile scan.
#[derive(Debug)]
pub enum ScanOutcome {
    Clean,
    StaleSnapshot,
    Drifted(ReconcileReport),
}

/// In-flight PLACED order the retry tick is watching.
#[derive(Clone, Debug)]
pub struct WatchedOrder {
    pub internal_id: String,
    pub placed_ts: i64,
    pub requested_qty: i64,
    pub filled_qty: i64,
    pub retries_done: u32,
}

/// What the caller must do after a retry-tick pass over one order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryTickOutcome {
    Wait,
    Resubmit { internal_id: String, attempt: u32 },
    Cancel { internal_id: String, reason: CancelReason },
}

pub struct Reconciler {
    pool: PgPool,
    run_id: Uuid,
    watermark: Mutex<SnapshotWatermark>,
    arm_state: Arc<Mutex<ArmState>>,
}

impl Reconciler {
    pub fn new(pool: PgPool, run_id: Uuid, arm_state: Arc<Mutex<ArmState>>) -> Self {
        Self {
            pool,
            run_id,
            watermark: Mutex::new(SnapshotWatermark::new()),
            arm_state,
        }
    }

    /// Run one full-scan reconcile pass against a freshly fetched broker
    /// snapshot. Always writes a checkpoint row (CLEAN or DIRTY); on drift,
    /// disarms the system before returning.
    pub async fn full_scan(&self, local: &LocalSnapshot, broker: &BrokerSnapshot) -> anyhow::Result<ScanOutcome> {
        let attempt = {
            let mut wm = self.watermark.lock().expect("watermark mutex poisoned");
            reconcile_monotonic(&mut wm, local, broker)
        };

        let watermark_ms = self.watermark.lock().expect("watermark mutex poisoned").last_accepted_ms();

        let report = match attempt {
            Err(_stale) => {
                ntx_db::reconcile_checkpoint_write(&self.pool, self.run_id, "DIRTY", watermark_ms, "stale_snapshot")
                    .await?;
                return Ok(ScanOutcome::StaleSnapshot);
            }
            Ok(report) => report,
        };

        if report.is_clean() {
            let hash = report_hash(&report);
            ntx_db::reconcile_checkpoint_write(&self.pool, self.run_id, "CLEAN", watermark_ms, &hash).await?;
            return Ok(ScanOutcome::Clean);
        }

        let hash = report_hash(&report);
        ntx_db::reconcile_checkpoint_write(&self.pool, self.run_id, "DIRTY", watermark_ms, &hash).await?;

        let disarmed = ArmState::reconcile_disarm();
        *self.arm_state.lock().expect("arm state mutex poisoned") = disarmed.clone();
        let reason = match &disarmed {
            ArmState::Disarmed { reason } => format!("{reason:?}"),
            ArmState::Armed => unreachable!("reconcile_disarm always returns Disarmed"),
        };
        ntx_db::persist_arm_state(&self.pool, "DISARMED", Some(&reason)).await?;

        Ok(ScanOutcome::Drifted(report))
    }

    /// Apply the retry/backoff schedule to a single watched PLACED order.
    pub fn retry_tick(&self, order: &WatchedOrder, now_ts: i64) -> RetryTickOutcome {
        match next_action(order.placed_ts, now_ts, order.requested_qty, order.filled_qty, order.retries_done) {
            RetryAction::Wait => RetryTickOutcome::Wait,
            RetryAction::Retry { attempt } => RetryTickOutcome::Resubmit {
                internal_id: order.internal_id.clone(),
                attempt,
            },
            RetryAction::Cancel { reason } => RetryTickOutcome::Cancel {
                internal_id: order.internal_id.clone(),
                reason,
            },
        }
    }

    pub fn watermark_ms(&self) -> i64 {
        self.watermark.lock().expect("watermark mutex poisoned").last_accepted_ms()
    }
}
