//! Common utilities for integration tests.
//!
//! Provides a fake host speaking the server-info and app-list endpoints over plain
//! HTTP on loopback, and a client config pointing at it.

use alloc::sync::Arc;
use core::{net::Ipv4Addr, time::Duration};
use std::{
    collections::HashMap,
    env,
    sync::{Mutex, PoisonError},
};

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use tokio::{net::TcpListener, task::JoinHandle, time::Instant};
use uuid::Uuid;

use streamhost_client::config::ClientConfig;
use streamhost_common::{PairState, ServerInfo};

/// Loopback address the fake host listens on.
pub(crate) const HOST_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;
/// Address the fake host claims as its external one. Nothing listens there.
pub(crate) const EXTERNAL_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

#[derive(Debug)]
struct FakeState {
    info: ServerInfo,
    app_list: String,
    client_ids: Vec<String>,
}

type Shared = Arc<Mutex<FakeState>>;

/// A host answering `/serverinfo` and `/applist` until dropped or stopped.
pub(crate) struct FakeHost {
    pub(crate) port: u16,
    pub(crate) uuid: Uuid,
    state: Shared,
    server: Option<JoinHandle<()>>,
}

pub(crate) fn server_info(name: &str, uuid: Uuid) -> ServerInfo {
    ServerInfo {
        hostname: name.to_owned(),
        uuid: Some(uuid),
        mac: "aa:bb:cc:dd:ee:ff".to_owned(),
        local_ip: Some(HOST_IP.into()),
        external_ip: Some(EXTERNAL_IP.into()),
        pair_status: PairState::Paired,
        current_game: 0,
    }
}

async fn serve_server_info(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<ServerInfo> {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(id) = params.get("uniqueid") {
        state.client_ids.push(id.clone());
    }
    Json(state.info.clone())
}

async fn serve_app_list(State(state): State<Shared>) -> String {
    state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .app_list
        .clone()
}

impl FakeHost {
    /// Starts a host called `name` with a fresh UUID on a free loopback port.
    pub(crate) async fn start(name: &str) -> Self {
        let listener = TcpListener::bind((HOST_IP, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let uuid = Uuid::new_v4();
        let state = Arc::new(Mutex::new(FakeState {
            info: server_info(name, uuid),
            app_list: String::new(),
            client_ids: Vec::new(),
        }));
        let server = Some(Self::spawn(listener, Arc::clone(&state)));
        Self {
            port,
            uuid,
            state,
            server,
        }
    }

    fn spawn(listener: TcpListener, state: Shared) -> JoinHandle<()> {
        let app = Router::new()
            .route("/serverinfo", get(serve_server_info))
            .route("/applist", get(serve_app_list))
            .with_state(state);
        tokio::spawn(async move {
            drop(axum::serve(listener, app).await);
        })
    }

    /// Stops accepting connections.
    pub(crate) fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }

    /// Accepts connections on the same port again.
    pub(crate) async fn restart(&mut self) {
        self.stop();
        let listener = TcpListener::bind((HOST_IP, self.port)).await.unwrap();
        self.server = Some(Self::spawn(listener, Arc::clone(&self.state)));
    }

    pub(crate) fn set_app_list(&self, raw: &str) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .app_list = raw.to_owned();
    }

    pub(crate) fn set_running_app(&self, id: u32) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .info
            .current_game = id;
    }

    /// Client ids sent with every server-info request so far.
    pub(crate) fn client_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .client_ids
            .clone()
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Client config talking plain HTTP to `port`, with short periods and its own storage.
pub(crate) fn test_config(port: u16) -> ClientConfig {
    let dir = env::temp_dir().join(format!("streamhost_it_{}", Uuid::new_v4()));
    let mut config = ClientConfig::default();
    config.network.https_port = port;
    config.network.tls = false;
    config.network.fast_poll_timeout_ms = 200;
    config.network.request_timeout_ms = 2000;
    config.polling.status_period_ms = 50;
    config.polling.offline_threshold = 2;
    config.polling.applist_period_ms = 200;
    config.polling.applist_retry_ms = 50;
    config.polling.stop_wait_interval_ms = 10;
    config.storage.db_path = dir.join("hosts.db").display().to_string();
    config.storage.cache_dir = dir.join("cache").display().to_string();
    config.discovery.enable = false;
    config
}

/// Polls `condition` until it holds, failing the test after ten seconds.
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
