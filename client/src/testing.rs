//! Test doubles for the unit tests: a scripted [`HostTransport`], discovery and
//! observer, plus a manager wired to them with short polling periods.

use alloc::{collections::VecDeque, sync::Arc};
use core::{
    net::IpAddr,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::{collections::HashMap, env, path::Path, sync::Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use streamhost_common::{PairState, ServerInfo};

use crate::{
    config::ClientConfig,
    discovery::{CandidateTx, Discovery, NoDiscovery},
    host::HostRecord,
    manager::{HostManager, HostObserver},
    registry::Registry,
    transport::{HostTransport, TransportError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Probe(IpAddr),
    ServerInfo(IpAddr),
    AppList(IpAddr),
}

#[derive(Debug, Default)]
struct FakeHost {
    reachable: bool,
    probe_delay: Duration,
    info: Option<ServerInfo>,
    app_lists: VecDeque<String>,
}

/// Transport answering from per-address scripts instead of the network.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    hosts: Mutex<HashMap<IpAddr, FakeHost>>,
    request_delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub(crate) fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub(crate) fn server_info(name: &str, uuid: Uuid, local: &str, external: &str) -> ServerInfo {
    ServerInfo {
        hostname: name.to_owned(),
        uuid: Some(uuid),
        mac: "aa:bb:cc:dd:ee:ff".to_owned(),
        local_ip: Some(ip(local)),
        external_ip: Some(ip(external)),
        pair_status: PairState::Paired,
        current_game: 0,
    }
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_host<R>(&self, addr: IpAddr, f: impl FnOnce(&mut FakeHost) -> R) -> R {
        f(self.hosts.lock().unwrap().entry(addr).or_default())
    }

    /// Makes `addr` accept connections and answer the handshake with `info`.
    pub(crate) fn serve(&self, addr: IpAddr, info: ServerInfo) {
        self.with_host(addr, |h| {
            h.reachable = true;
            h.info = Some(info);
        });
    }

    pub(crate) fn set_reachable(&self, addr: IpAddr, reachable: bool) {
        self.with_host(addr, |h| h.reachable = reachable);
    }

    /// Keeps the port open but makes the handshake fail.
    pub(crate) fn break_handshake(&self, addr: IpAddr) {
        self.with_host(addr, |h| h.info = None);
    }

    pub(crate) fn set_probe_delay(&self, addr: IpAddr, delay: Duration) {
        self.with_host(addr, |h| h.probe_delay = delay);
    }

    pub(crate) fn set_request_delay(&self, delay: Duration) {
        *self.request_delay.lock().unwrap() = delay;
    }

    /// Queues a catalog; the last queued catalog keeps being served.
    pub(crate) fn push_app_list(&self, addr: IpAddr, raw: &str) {
        self.with_host(addr, |h| h.app_lists.push_back(raw.to_owned()));
    }

    /// Replaces every queued catalog with `raw`.
    pub(crate) fn set_app_list(&self, addr: IpAddr, raw: &str) {
        self.with_host(addr, |h| h.app_lists = VecDeque::from([raw.to_owned()]));
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn request<T>(
        &self,
        addr: IpAddr,
        f: impl FnOnce(&mut FakeHost) -> Option<T>,
    ) -> Result<T, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.request_delay.lock().unwrap();
        sleep(delay).await;
        let res = {
            let mut hosts = self.hosts.lock().unwrap();
            hosts.get_mut(&addr).filter(|h| h.reachable).and_then(f)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res.ok_or(TransportError::Status {
            addr,
            status: StatusCode::SERVICE_UNAVAILABLE,
        })
    }
}

#[async_trait]
impl HostTransport for ScriptedTransport {
    async fn probe(&self, addr: IpAddr) -> bool {
        self.calls.lock().unwrap().push(Call::Probe(addr));
        let (reachable, delay) = self.with_host(addr, |h| (h.reachable, h.probe_delay));
        sleep(delay).await;
        reachable
    }

    async fn server_info(&self, addr: IpAddr) -> Result<ServerInfo, TransportError> {
        self.calls.lock().unwrap().push(Call::ServerInfo(addr));
        self.request(addr, |h| h.info.clone()).await
    }

    async fn app_list(&self, addr: IpAddr) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(Call::AppList(addr));
        self.request(addr, |h| {
            if h.app_lists.len() > 1 {
                h.app_lists.pop_front()
            } else {
                h.app_lists.front().cloned()
            }
        })
        .await
    }
}

/// Observer recording every update it receives.
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    updates: Mutex<Vec<HostRecord>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn updates(&self) -> Vec<HostRecord> {
        self.updates.lock().unwrap().clone()
    }
}

impl HostObserver for RecordingObserver {
    fn host_updated(&self, host: &HostRecord) {
        self.updates.lock().unwrap().push(host.clone());
    }
}

/// Discovery the test feeds by hand.
#[derive(Debug, Default)]
pub(crate) struct ManualDiscovery {
    sender: Mutex<Option<CandidateTx>>,
}

impl ManualDiscovery {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reports `addr` as a candidate. Returns `false` while discovery is stopped.
    pub(crate) fn announce(&self, addr: IpAddr) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(addr).is_ok())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}

impl Discovery for ManualDiscovery {
    fn start(&self, candidates: CandidateTx) {
        *self.sender.lock().unwrap() = Some(candidates);
    }

    fn stop(&self) {
        *self.sender.lock().unwrap() = None;
    }
}

/// Config with short periods so real-time tests finish quickly.
///
/// Tests touching the registry can't use paused time: `SQLite` work happens on its
/// own thread, and the runtime would skip ahead while waiting for it.
pub(crate) fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.polling.status_period_ms = 50;
    config.polling.applist_period_ms = 200;
    config.polling.applist_retry_ms = 50;
    config.polling.stop_wait_interval_ms = 10;
    config.network.fast_poll_timeout_ms = 100;
    config.storage.cache_dir = env::temp_dir()
        .join(format!("streamhost_test_{}", Uuid::new_v4()))
        .display()
        .to_string();
    config
}

pub(crate) async fn manager_with_config(
    config: ClientConfig,
    transport: Arc<ScriptedTransport>,
    discovery: Arc<dyn Discovery>,
) -> HostManager {
    let registry = Registry::open(Path::new(":memory:")).await.unwrap();
    HostManager::open(config, registry, transport, discovery)
        .await
        .unwrap()
}

pub(crate) async fn test_manager(transport: Arc<ScriptedTransport>) -> HostManager {
    manager_with_config(fast_config(), transport, Arc::new(NoDiscovery)).await
}

pub(crate) const LOCAL: &str = "192.168.1.5";
pub(crate) const REMOTE: &str = "198.51.100.9";

/// Serves host "den" with `uuid` on both [`LOCAL`] and [`REMOTE`].
pub(crate) fn serve_den(transport: &ScriptedTransport, uuid: Uuid) {
    transport.serve(ip(LOCAL), server_info("den", uuid, LOCAL, REMOTE));
    transport.serve(ip(REMOTE), server_info("den", uuid, LOCAL, REMOTE));
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}
