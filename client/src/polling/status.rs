//! The per-host status poller.
//!
//! Each cycle holds the host's network lock, runs one reachability and handshake pass
//! and folds the result into the host's record. Failed cycles are counted and only
//! reported once they reach the configured offline threshold, so a single lost packet
//! does not make a host flap between online and offline.

use alloc::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handshake::{PollTarget, poll_host};
use crate::{
    host::HostRecord,
    manager::{HostEntry, HostManager},
};

/// What a single status cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// The host answered; its record was updated, stored and reported.
    Online,
    /// The host did not answer, but not often enough yet to call it offline.
    Missed,
    /// The host reached the offline threshold and was reported offline.
    WentOffline,
    /// The host was removed while the cycle ran; the result was dropped.
    Removed,
    /// Polling stopped while the cycle ran; the result was dropped.
    Interrupted,
}

/// Polls `entry` every status period until `cancel` fires.
pub(crate) async fn run_status_loop(
    manager: HostManager,
    entry: Arc<HostEntry>,
    cancel: CancellationToken,
) {
    let period = manager.config().polling.status_period();
    let mut offline_count = 0;
    debug!("Status polling started");

    loop {
        let outcome = {
            let _network = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                guard = entry.network_lock.lock() => guard,
            };
            run_status_cycle(&manager, &entry, &cancel, &mut offline_count).await
        };
        debug!(?outcome, "Status cycle finished");
        if outcome == CycleOutcome::Interrupted {
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sleep(period) => {}
        }
    }
    debug!("Status polling stopped");
}

/// Runs one status cycle. The caller holds the host's network lock.
pub(crate) async fn run_status_cycle(
    manager: &HostManager,
    entry: &HostEntry,
    cancel: &CancellationToken,
    offline_count: &mut u32,
) -> CycleOutcome {
    let _active = manager.begin_poll();
    let target = PollTarget::from(&*entry.record.borrow());
    let polled = poll_host(manager.transport(), &manager.config().network, &target).await;
    if cancel.is_cancelled() {
        debug!("Polling stopped during the cycle, dropping its result");
        return CycleOutcome::Interrupted;
    }

    let mut record = entry.snapshot();
    let outcome = match polled {
        Ok(snapshot) => {
            *offline_count = 0;
            let was_online = record.is_online();
            record.merge(snapshot);
            if !was_online {
                info!(reachability = ?record.reachability, "Host is online");
            }
            CycleOutcome::Online
        }
        Err(e) => {
            let threshold = manager.config().polling.offline_threshold;
            *offline_count += 1;
            if *offline_count < threshold {
                debug!(attempt = *offline_count, threshold, "Host did not answer: {e}");
                return CycleOutcome::Missed;
            }
            *offline_count = 0;
            info!("Host is offline after {threshold} failed polls: {e}");
            record.mark_offline();
            CycleOutcome::WentOffline
        }
    };

    if let Err(dropped) = persist(manager, &record).await {
        return dropped;
    }
    entry.record.send_replace(record.clone());
    manager.notify(&record);
    outcome
}

/// Stores `record` unless its host disappeared while the cycle ran.
async fn persist(manager: &HostManager, record: &HostRecord) -> Result<(), CycleOutcome> {
    let Some(db) = manager.registry() else {
        return Err(CycleOutcome::Interrupted);
    };
    if !manager.is_tracked(record.uuid) || db.lookup(record.uuid).await.is_none() {
        debug!("Host was removed during the cycle, dropping its result");
        return Err(CycleOutcome::Removed);
    }
    if !db.upsert(record).await {
        warn!("Could not store host state, reporting it anyway");
    }
    Ok(())
}
