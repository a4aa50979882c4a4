//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)
#![expect(
    clippy::tests_outside_test_module,
    reason = "This is the integration test binary, so it's expected that tests are outside of a test module"
)]
#![expect(clippy::shadow_unrelated, reason = "This is a common pattern in tests")]
#![expect(clippy::unwrap_used, reason = "Using unwrap in tests is fine")]

extern crate alloc;
extern crate core;

mod common;

use alloc::sync::Arc;
use core::net::IpAddr;
use std::sync::Mutex;

use streamhost_client::{HostRecord, HostState, Reachability, run::open_manager};

use common::{FakeHost, HOST_IP, test_config, wait_until};

fn recorder() -> (Arc<Mutex<Vec<HostRecord>>>, impl Fn(&HostRecord) + Send + Sync) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    (updates, move |host: &HostRecord| {
        sink.lock().unwrap().push(host.clone());
    })
}

#[tokio::test]
async fn add_host_over_http() {
    let host = FakeHost::start("den").await;
    let manager = open_manager(test_config(host.port)).await.unwrap();

    assert!(
        manager.add_host_blocking(IpAddr::V4(HOST_IP)).await,
        "fake host should be added"
    );
    let record = manager.get_computer(host.uuid).unwrap();
    assert_eq!(record.name, "den");
    assert_eq!(record.state, HostState::Online);
    assert_eq!(record.reachability, Reachability::Local);
    assert_eq!(record.local_ip, IpAddr::V4(HOST_IP));
    assert_eq!(record.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    assert!(
        host.client_ids().iter().all(|id| id == manager.unique_id()),
        "every request carries the client id"
    );
    manager.shutdown();
}

#[tokio::test]
async fn nothing_listening_is_not_added() {
    let mut host = FakeHost::start("den").await;
    host.stop();
    let manager = open_manager(test_config(host.port)).await.unwrap();
    assert!(!manager.add_host_blocking(IpAddr::V4(HOST_IP)).await, "port is closed");
    assert!(manager.hosts().is_empty());
    manager.shutdown();
}

#[tokio::test]
async fn polling_follows_host_going_away_and_back() {
    let mut host = FakeHost::start("den").await;
    let manager = open_manager(test_config(host.port)).await.unwrap();
    assert!(manager.add_host_blocking(IpAddr::V4(HOST_IP)).await, "host should be added");

    let (updates, observer) = recorder();
    manager.start_polling(Arc::new(observer));

    host.set_running_app(7);
    wait_until("running app to show up", || {
        manager.get_computer(host.uuid).unwrap().running_app == 7
    })
    .await;

    host.stop();
    wait_until("host to go offline", || {
        manager.get_computer(host.uuid).unwrap().state == HostState::Offline
    })
    .await;
    let offline = manager.get_computer(host.uuid).unwrap();
    assert_eq!(offline.reachability, Reachability::Offline);
    assert!(
        updates
            .lock()
            .unwrap()
            .iter()
            .any(|h| h.state == HostState::Offline),
        "observer saw the host go offline"
    );

    host.restart().await;
    wait_until("host to come back", || {
        manager.get_computer(host.uuid).unwrap().state == HostState::Online
    })
    .await;

    manager.stop_polling();
    manager.wait_for_polling_stopped().await;
    manager.shutdown();
}

#[tokio::test]
async fn app_list_is_fetched_and_cached() {
    const CATALOG: &str = r#"[{"id":1,"title":"Desktop"},{"id":2,"title":"Steam","hdr_supported":true}]"#;

    let host = FakeHost::start("den").await;
    host.set_app_list(CATALOG);
    let config = test_config(host.port);
    let cache_file = std::path::Path::new(&config.storage.cache_dir)
        .join("applist")
        .join(host.uuid.to_string());
    let manager = open_manager(config).await.unwrap();
    assert!(manager.add_host_blocking(IpAddr::V4(HOST_IP)).await, "host should be added");

    let mut poller = manager.create_app_list_poller(host.uuid).unwrap();
    poller.start();
    wait_until("catalog", || {
        manager.get_computer(host.uuid).unwrap().raw_app_list.as_deref() == Some(CATALOG)
    })
    .await;
    assert_eq!(tokio::fs::read_to_string(&cache_file).await.unwrap(), CATALOG);

    poller.stop();
    manager.wait_for_polling_stopped().await;
    manager.shutdown();
}

#[tokio::test]
async fn hosts_survive_a_restart() {
    let host = FakeHost::start("den").await;
    let config = test_config(host.port);

    let manager = open_manager(config.clone()).await.unwrap();
    assert!(manager.add_host_blocking(IpAddr::V4(HOST_IP)).await, "host should be added");
    let unique_id = manager.unique_id().to_owned();
    manager.shutdown();

    let manager = open_manager(config.clone()).await.unwrap();
    let record = manager.get_computer(host.uuid).unwrap();
    assert_eq!(record.name, "den");
    assert_eq!(record.state, HostState::Unknown, "state is unknown until polled");
    assert_eq!(manager.unique_id(), unique_id, "client id is stable");

    assert!(manager.remove_host("den").await, "remove should succeed");
    manager.shutdown();

    let manager = open_manager(config).await.unwrap();
    assert!(manager.hosts().is_empty(), "removal is persisted");
    manager.shutdown();
}
