//! The per-host app-list poller.

use alloc::sync::Arc;

use tokio::{sync::Notify, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, info_span, warn};

use streamhost_common::parse_app_list;

use crate::manager::{HostEntry, HostManager, PollerTask};

/// What a single app-list cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AppListOutcome {
    /// A catalog was cached, stored on the record and reported.
    Accepted,
    /// An empty catalog was received but not believed yet.
    Rejected,
    /// The request failed or returned something unusable.
    Failed,
    /// The host is not online.
    Skipped,
    /// The poller was stopped or the host removed.
    Interrupted,
}

/// Keeps the application catalog of one host current.
///
/// Created stopped by [`HostManager::create_app_list_poller`]. Stopping polling on the
/// manager stops it too; it can be started again afterwards. Dropping the handle
/// stops the poller.
pub struct AppListPoller {
    manager: HostManager,
    entry: Arc<HostEntry>,
    wake: Arc<Notify>,
    task: Option<PollerTask>,
}

impl AppListPoller {
    pub(crate) fn new(manager: HostManager, entry: Arc<HostEntry>) -> Self {
        Self {
            manager,
            entry,
            wake: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Starts polling right away. Has no effect while running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let cancel = self.manager.polling_generation().child_token();
        let span = {
            let record = self.entry.record.borrow();
            info_span!("host.applist", host = %record.name, uuid = %record.uuid)
        };
        let handle = tokio::spawn(
            run_app_list_loop(
                self.manager.clone(),
                Arc::clone(&self.entry),
                Arc::clone(&self.wake),
                cancel.clone(),
            )
            .instrument(span),
        );
        self.task = Some(PollerTask { cancel, handle });
    }

    /// Stops polling. A request in flight is left to finish, its result is dropped.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
        }
    }

    /// Cuts the current wait short and fetches the catalog now.
    pub fn poll_now(&self) {
        self.wake.notify_one();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(PollerTask::is_running)
    }
}

impl Drop for AppListPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_app_list_loop(
    manager: HostManager,
    entry: Arc<HostEntry>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    let period = manager.config().polling.applist_period();
    let retry = manager.config().polling.applist_retry();
    let mut empty_count = 0;
    debug!("App list polling started");

    loop {
        let outcome = {
            let _network = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                guard = entry.network_lock.lock() => guard,
            };
            run_app_list_cycle(&manager, &entry, &cancel, &mut empty_count).await
        };
        let delay = match outcome {
            AppListOutcome::Accepted => period,
            AppListOutcome::Rejected | AppListOutcome::Failed | AppListOutcome::Skipped => retry,
            AppListOutcome::Interrupted => break,
        };
        debug!(?outcome, "App list cycle finished, next one in {delay:?}");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = wake.notified() => debug!("App list refresh requested"),
            () = sleep(delay) => {}
        }
    }
    debug!("App list polling stopped");
}

/// Runs one app-list cycle. The caller holds the host's network lock.
pub(crate) async fn run_app_list_cycle(
    manager: &HostManager,
    entry: &HostEntry,
    cancel: &CancellationToken,
    empty_count: &mut u32,
) -> AppListOutcome {
    let record = entry.snapshot();
    if !manager.is_tracked(record.uuid) {
        debug!("Host is no longer tracked");
        return AppListOutcome::Interrupted;
    }
    if !record.is_online() {
        debug!(state = ?record.state, "Host is not online, skipping app list");
        return AppListOutcome::Skipped;
    }

    let _active = manager.begin_poll();
    let fetched = manager.transport().app_list(record.address()).await;
    if cancel.is_cancelled() {
        return AppListOutcome::Interrupted;
    }
    if !manager.is_tracked(record.uuid) {
        debug!("Host was removed while its app list was fetched");
        return AppListOutcome::Interrupted;
    }
    let raw = match fetched {
        Ok(raw) if !raw.trim().is_empty() => raw,
        Ok(_) => {
            warn!("Host sent no app list");
            return AppListOutcome::Failed;
        }
        Err(e) => {
            debug!("App list request failed: {e}");
            return AppListOutcome::Failed;
        }
    };
    let apps = match parse_app_list(&raw) {
        Ok(apps) => apps,
        Err(e) => {
            warn!("Malformed app list: {e}");
            return AppListOutcome::Failed;
        }
    };

    if apps.is_empty() {
        // Hosts sometimes answer with an empty list while they start up.
        *empty_count += 1;
        let threshold = manager.config().polling.empty_list_threshold;
        if *empty_count < threshold {
            warn!(
                attempt = *empty_count,
                threshold, "Empty app list received, keeping the previous one"
            );
            return AppListOutcome::Rejected;
        }
    } else {
        *empty_count = 0;
    }

    manager.cache().store(record.uuid, &raw).await;
    entry
        .record
        .send_modify(|current| current.raw_app_list = Some(raw));
    debug!(apps = apps.len(), "App list updated");
    manager.notify(&entry.snapshot());
    AppListOutcome::Accepted
}
