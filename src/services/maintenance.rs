//! Periodic maintenance: retention purge and orphaned-blob sweeps.
//!
//! All sweeps run one after another on a single task, so two sweeps of the
//! same bucket never overlap.

use crate::services::object_store::ObjectStore;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SweepPlan {
    /// Retention window passed to the purge; `None` disables it.
    pub retention: Option<Duration>,
    /// Pause between sweep rounds.
    pub every: Duration,
    /// `(schema, bucket)` pairs checked for orphaned payloads.
    pub orphan_buckets: Vec<(String, String)>,
}

/// Outcome of one sweep round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub purged_objects: u64,
    pub dropped_orphans: u64,
    pub failures: usize,
}

/// Run every configured sweep once. Failures are logged and counted; one
/// failing bucket does not stop the others.
pub async fn run_once(store: &ObjectStore, plan: &SweepPlan) -> SweepReport {
    let mut report = SweepReport::default();

    if let Some(retention) = plan.retention {
        match store.drop_objects_before_interval(retention).await {
            Ok(n) => report.purged_objects += n,
            Err(err) => {
                warn!("retention sweep failed: {}", err);
                report.failures += 1;
            }
        }
    }

    for (schema, bucket) in &plan.orphan_buckets {
        match store.drop_invalid_object_files(schema, bucket).await {
            Ok(n) => report.dropped_orphans += n,
            Err(err) => {
                warn!("orphan sweep of {}/{} failed: {}", schema, bucket, err);
                report.failures += 1;
            }
        }
    }

    report
}

/// Spawn the sweep loop. The first round runs immediately.
pub fn spawn(store: ObjectStore, plan: SweepPlan) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "maintenance every {:?}: retention={:?}, {} orphan buckets",
            plan.every,
            plan.retention,
            plan.orphan_buckets.len()
        );
        let mut ticker = tokio::time::interval(plan.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = run_once(&store, &plan).await;
            info!("maintenance round finished: {:?}", report);
        }
    })
}
