//! The host manager: the table of tracked hosts, their pollers and the observer fan-out.
//!
//! Every tracked host has one [`HostEntry`] holding its live record and the network
//! lock its status and app-list pollers share. The table of entries is guarded by a
//! separate structural lock that is never held across an `.await`.

use alloc::sync::Arc;
use core::{
    net::IpAddr,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError, RwLock},
};

use eyre::{OptionExt as _, Result};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    cache::AppListCache,
    config::ClientConfig,
    discovery::Discovery,
    host::{HostRecord, HostState, Reachability},
    polling::{AppListPoller, PollTarget, poll_host, run_status_loop},
    registry::{Registry, RegistryRef},
    transport::HostTransport,
};

/// Receives every host update produced by the pollers or the add-host path.
///
/// Called from whichever background task produced the update.
pub trait HostObserver: Send + Sync {
    fn host_updated(&self, host: &HostRecord);
}

impl<F> HostObserver for F
where
    F: Fn(&HostRecord) + Send + Sync,
{
    fn host_updated(&self, host: &HostRecord) {
        self(host);
    }
}

/// Live state of one tracked host.
#[derive(Debug)]
pub(crate) struct HostEntry {
    pub(crate) record: watch::Sender<HostRecord>,
    /// Serializes all network sessions to this host.
    pub(crate) network_lock: tokio::sync::Mutex<()>,
}

impl HostEntry {
    fn new(record: HostRecord) -> Arc<Self> {
        Arc::new(Self {
            record: watch::Sender::new(record),
            network_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub(crate) fn snapshot(&self) -> HostRecord {
        self.record.borrow().clone()
    }

    pub(crate) fn uuid(&self) -> Uuid {
        self.record.borrow().uuid
    }
}

/// A spawned poller and the token that stops it.
#[derive(Debug)]
pub(crate) struct PollerTask {
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
}

impl PollerTask {
    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

#[derive(Debug)]
struct PollingSession {
    entry: Arc<HostEntry>,
    status: Option<PollerTask>,
}

#[derive(Debug)]
struct PollingState {
    active: bool,
    /// Parent of every poller started since polling was last stopped.
    generation: CancellationToken,
}

/// Counts a network pass in flight for [`HostManager::wait_for_polling_stopped`].
pub(crate) struct ActivePoll<'a>(&'a AtomicUsize);

impl Drop for ActivePoll<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Inner {
    config: ClientConfig,
    registry: Arc<Registry>,
    transport: Arc<dyn HostTransport>,
    cache: AppListCache,
    discovery: Arc<dyn Discovery>,
    unique_id: String,
    sessions: Mutex<HashMap<Uuid, PollingSession>>,
    observer: RwLock<Option<Arc<dyn HostObserver>>>,
    polling: Mutex<PollingState>,
    active_polls: AtomicUsize,
    /// Cancelled by [`HostManager::shutdown`]; parent of every generation.
    root: CancellationToken,
}

/// Tracks known hosts and keeps their state current while polling is active.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct HostManager {
    inner: Arc<Inner>,
}

impl HostManager {
    /// Builds the manager on an opened registry and loads every stored host.
    ///
    /// Loaded hosts start out with unknown state and reachability until they are
    /// polled; their last accepted app catalog is taken from the cache. The manager
    /// takes over the registry's initial reference and releases it in [`Self::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is already closed or the client id cannot be loaded.
    #[tracing::instrument(skip_all)]
    pub async fn open(
        config: ClientConfig,
        registry: Arc<Registry>,
        transport: Arc<dyn HostTransport>,
        discovery: Arc<dyn Discovery>,
    ) -> Result<Self> {
        let cache = AppListCache::new(Path::new(&config.storage.cache_dir));
        let (stored, unique_id) = {
            let db = registry
                .acquire()
                .ok_or_eyre("Host registry is already closed")?;
            let stored = db.get_all().await.unwrap_or_else(|| {
                warn!("Could not read stored hosts, starting with an empty table");
                Vec::new()
            });
            let unique_id = db
                .unique_id()
                .await
                .ok_or_eyre("Failed to load the client id")?;
            (stored, unique_id)
        };

        let mut sessions = HashMap::with_capacity(stored.len());
        for mut record in stored {
            record.state = HostState::Unknown;
            record.reachability = Reachability::Unknown;
            record.raw_app_list = cache.load(record.uuid).await;
            debug!(host = %record.name, uuid = %record.uuid, "Loaded host");
            sessions.insert(
                record.uuid,
                PollingSession {
                    entry: HostEntry::new(record),
                    status: None,
                },
            );
        }
        info!("Tracking {} known host(s)", sessions.len());

        let root = CancellationToken::new();
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                transport,
                cache,
                discovery,
                unique_id,
                sessions: Mutex::new(sessions),
                observer: RwLock::new(None),
                polling: Mutex::new(PollingState {
                    active: false,
                    generation: root.child_token(),
                }),
                active_polls: AtomicUsize::new(0),
                root,
            }),
        })
    }

    /// The id this client identifies itself to hosts with.
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.inner.unique_id
    }

    /// Starts discovery and a status poller for every tracked host.
    ///
    /// Calling this while polling is active only replaces the observer and starts
    /// pollers for hosts that have none. Each host whose poller gets started is
    /// reported to the observer once.
    pub fn start_polling(&self, observer: Arc<dyn HostObserver>) {
        self.set_observer(Some(observer));

        let (generation, newly_started) = {
            let mut polling = self.polling_state();
            let newly_started = !polling.active;
            polling.active = true;
            (polling.generation.clone(), newly_started)
        };

        if newly_started {
            info!("Starting host polling");
            self.start_discovery(&generation);
        }

        let started: Vec<HostRecord> = {
            let mut sessions = self.sessions();
            sessions
                .values_mut()
                .filter_map(|session| {
                    if session.status.as_ref().is_some_and(PollerTask::is_running) {
                        return None;
                    }
                    self.spawn_status_poller(session, &generation);
                    Some(session.entry.snapshot())
                })
                .collect()
        };
        for record in &started {
            self.notify(record);
        }
    }

    /// Stops discovery and signals every poller to exit, app-list pollers included.
    /// In-flight requests are left to finish.
    pub fn stop_polling(&self) {
        {
            let mut polling = self.polling_state();
            polling.generation.cancel();
            polling.generation = self.inner.root.child_token();
            if !polling.active {
                return;
            }
            polling.active = false;
        }
        info!("Stopping host polling");
        self.inner.discovery.stop();
        for session in self.sessions().values_mut() {
            session.status = None;
        }
        self.set_observer(None);
    }

    /// Waits until no poll started before [`Self::stop_polling`] is still in flight.
    pub async fn wait_for_polling_stopped(&self) {
        let interval = self.inner.config.polling.stop_wait_interval();
        while self.inner.active_polls.load(Ordering::Acquire) > 0 {
            debug!("Waiting for in-flight polls to finish");
            sleep(interval).await;
        }
    }

    /// Runs one reachability and handshake pass against `addr` and registers the host
    /// that answered.
    ///
    /// Returns `false` without changing anything if the host cannot be reached, if it
    /// claims the name of another registered host, or if it cannot be stored. This
    /// awaits network I/O and should not be called where latency matters.
    #[tracing::instrument(skip(self))]
    pub async fn add_host_blocking(&self, addr: IpAddr) -> bool {
        let _active = self.begin_poll();
        // Held across the network pass so a shutdown meanwhile cannot close the store.
        let Some(db) = self.registry() else {
            return false;
        };
        let snapshot = match poll_host(
            self.inner.transport.as_ref(),
            &self.inner.config.network,
            &PollTarget::new_host(addr),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                info!("No host found at {addr}: {e}");
                return false;
            }
        };
        let uuid = snapshot.uuid;

        if let Some(existing) = db.lookup_by_name(&snapshot.name).await
            && existing.uuid != uuid
        {
            warn!(host = %snapshot.name, %uuid, other = %existing.uuid, "Name already taken by another host");
            return false;
        }
        if self.find_by_name(&snapshot.name).is_some_and(|e| e.uuid() != uuid) {
            warn!(host = %snapshot.name, %uuid, "Name already taken by another tracked host");
            return false;
        }

        let tracked = self.entry(uuid).map(|e| e.snapshot());
        let mut candidate = match tracked {
            Some(record) => record,
            None => match db.lookup(uuid).await {
                Some(record) => record,
                None => HostRecord::from_snapshot(snapshot.clone()),
            },
        };
        candidate.merge(snapshot);
        if !db.upsert(&candidate).await {
            return false;
        }
        drop(db);

        let record = {
            let mut sessions = self.sessions();
            let session = sessions.entry(uuid).or_insert_with(|| {
                info!(host = %candidate.name, %uuid, "Tracking new host");
                PollingSession {
                    entry: HostEntry::new(candidate.clone()),
                    status: None,
                }
            });
            session.entry.record.send_modify(|current| {
                let raw_app_list = current.raw_app_list.take();
                *current = candidate;
                current.raw_app_list = raw_app_list;
            });
            let polling = self.polling_state();
            if polling.active && !session.status.as_ref().is_some_and(PollerTask::is_running) {
                self.spawn_status_poller(session, &polling.generation);
            }
            session.entry.snapshot()
        };
        self.notify(&record);
        true
    }

    /// Removes the host called `name` from the registry and stops its pollers.
    ///
    /// Returns `false` if no stored host has that name or the registry could not be updated.
    #[tracing::instrument(skip(self))]
    pub async fn remove_host(&self, name: &str) -> bool {
        let Some(db) = self.registry() else {
            return false;
        };
        let uuid = match db.lookup_by_name(name).await {
            Some(record) => Some(record.uuid),
            None => self.find_by_name(name).map(|e| e.uuid()),
        };
        if !db.delete(name).await {
            warn!("No stored host called '{name}'");
            return false;
        }
        drop(db);

        if let Some(uuid) = uuid {
            if let Some(session) = self.sessions().remove(&uuid)
                && let Some(task) = session.status
            {
                task.cancel.cancel();
            }
            self.inner.cache.remove(uuid).await;
        }
        info!("Removed host '{name}'");
        true
    }

    /// Current state of the host with `uuid`, if it is tracked.
    #[must_use]
    pub fn get_computer(&self, uuid: Uuid) -> Option<HostRecord> {
        self.entry(uuid).map(|e| e.snapshot())
    }

    /// Current state of every tracked host, ordered by name.
    #[must_use]
    pub fn hosts(&self) -> Vec<HostRecord> {
        let mut hosts: Vec<_> = self
            .sessions()
            .values()
            .map(|s| s.entry.snapshot())
            .collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        hosts
    }

    /// Follows the state of the host with `uuid`.
    #[must_use]
    pub fn subscribe(&self, uuid: Uuid) -> Option<watch::Receiver<HostRecord>> {
        self.entry(uuid).map(|e| e.record.subscribe())
    }

    /// Creates a stopped app-list poller for the host with `uuid`.
    #[must_use]
    pub fn create_app_list_poller(&self, uuid: Uuid) -> Option<AppListPoller> {
        self.entry(uuid)
            .map(|entry| AppListPoller::new(self.clone(), entry))
    }

    /// Stops polling for good and releases the registry.
    ///
    /// The registry is closed once the last in-flight operation has finished with it.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.inner.root.cancel();
        self.inner.registry.close();
        info!("Host manager shut down");
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &dyn HostTransport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn cache(&self) -> &AppListCache {
        &self.inner.cache
    }

    /// Acquires a registry reference, or `None` after shutdown.
    pub(crate) fn registry(&self) -> Option<RegistryRef> {
        let db = self.inner.registry.acquire();
        if db.is_none() {
            debug!("Host registry is closed");
        }
        db
    }

    pub(crate) fn begin_poll(&self) -> ActivePoll<'_> {
        self.inner.active_polls.fetch_add(1, Ordering::AcqRel);
        ActivePoll(&self.inner.active_polls)
    }

    /// Token of the current polling generation, cancelled by the next [`Self::stop_polling`].
    pub(crate) fn polling_generation(&self) -> CancellationToken {
        self.polling_state().generation.clone()
    }

    pub(crate) fn is_tracked(&self, uuid: Uuid) -> bool {
        self.sessions().contains_key(&uuid)
    }

    pub(crate) fn set_observer(&self, observer: Option<Arc<dyn HostObserver>>) {
        *self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = observer;
    }

    pub(crate) fn notify(&self, record: &HostRecord) {
        let observer = self
            .inner
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.host_updated(record);
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, PollingSession>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn polling_state(&self) -> MutexGuard<'_, PollingState> {
        self.inner
            .polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn entry(&self, uuid: Uuid) -> Option<Arc<HostEntry>> {
        self.sessions().get(&uuid).map(|s| Arc::clone(&s.entry))
    }

    fn find_by_name(&self, name: &str) -> Option<Arc<HostEntry>> {
        self.sessions()
            .values()
            .find(|s| s.entry.record.borrow().name == name)
            .map(|s| Arc::clone(&s.entry))
    }

    fn spawn_status_poller(&self, session: &mut PollingSession, generation: &CancellationToken) {
        let cancel = generation.child_token();
        let span = {
            let record = session.entry.record.borrow();
            info_span!("host.poll", host = %record.name, uuid = %record.uuid)
        };
        let handle = tokio::spawn(
            run_status_loop(self.clone(), Arc::clone(&session.entry), cancel.clone()).instrument(span),
        );
        session.status = Some(PollerTask { cancel, handle });
    }

    /// Feeds discovered addresses into the add-host path until the generation ends.
    fn start_discovery(&self, generation: &CancellationToken) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.discovery.start(tx);
        let manager = self.clone();
        let cancel = generation.child_token();
        tokio::spawn(
            async move {
                loop {
                    let addr = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        addr = rx.recv() => match addr {
                            Some(addr) => addr,
                            None => break,
                        },
                    };
                    debug!(%addr, "Discovered host candidate");
                    manager.add_host_blocking(addr).await;
                }
                debug!("Discovery intake stopped");
            }
            .in_current_span(),
        );
    }
}
