use alloc::sync::Arc;
use core::net::IpAddr;
use std::{
    collections::{HashMap, hash_map::Entry},
    path::Path,
};

use eyre::{OptionExt as _, Result, WrapErr as _, bail};
use tokio::{
    fs, signal,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::{self, ClientConfig},
    discovery::{BroadcastDiscovery, Discovery, NoDiscovery},
    host::HostRecord,
    manager::HostManager,
    polling::AppListPoller,
    registry::Registry,
    transport::HttpsTransport,
};

/// Creates a future that resolves when a shutdown signal is received.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to create SIGTERM signal handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            res = signal::ctrl_c() => drop(res),
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Loads the config at `path`, or the defaults if there is no such file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_config(path: &Path) -> Result<ClientConfig> {
    if fs::try_exists(path).await.unwrap_or(false) {
        return config::load(path).await;
    }
    info!("No config file at {}, using defaults", path.display());
    let mut config = ClientConfig::default();
    config.resolve_paths(path);
    Ok(config)
}

/// Opens the registry, sets up transport and discovery as configured and builds the manager.
///
/// # Errors
///
/// Returns an error if the registry cannot be opened or the HTTP client cannot be built.
pub async fn open_manager(config: ClientConfig) -> Result<HostManager> {
    let registry = Registry::open(Path::new(&config.storage.db_path))
        .await
        .wrap_err(format!(
            "Failed to open host registry at: {}",
            config.storage.db_path
        ))?;
    let unique_id = registry
        .acquire()
        .ok_or_eyre("Host registry closed during startup")?
        .unique_id()
        .await
        .ok_or_eyre("Failed to load the client id")?;
    let transport =
        HttpsTransport::new(&config.network, unique_id).wrap_err("Failed to set up HTTP client")?;
    let discovery: Arc<dyn Discovery> = if config.discovery.enable {
        Arc::new(BroadcastDiscovery::new(config.discovery.broadcast_port))
    } else {
        Arc::new(NoDiscovery)
    };
    HostManager::open(config, registry, Arc::new(transport), discovery).await
}

fn log_update(host: &HostRecord) {
    info!(
        host = %host.name,
        uuid = %host.uuid,
        state = ?host.state,
        reachability = ?host.reachability,
        running_app = host.running_app,
        has_app_list = host.raw_app_list.is_some(),
        "Host updated"
    );
}

fn print_host(host: &HostRecord) {
    println!(
        "{}\t{}\tlocal={}\tremote={}\tmac={}\tpair={:?}",
        host.name,
        host.uuid,
        host.local_ip,
        host.remote_ip,
        host.mac.as_deref().unwrap_or("-"),
        host.pair_state,
    );
}

/// Starts an app-list poller for every tracked host that has none yet and drops the
/// pollers of hosts that are gone.
fn sync_app_pollers(manager: &HostManager, pollers: &mut HashMap<Uuid, AppListPoller>) {
    pollers.retain(|uuid, _| manager.get_computer(*uuid).is_some());
    for host in manager.hosts() {
        if let Entry::Vacant(slot) = pollers.entry(host.uuid)
            && let Some(mut poller) = manager.create_app_list_poller(host.uuid)
        {
            debug!(host = %host.name, "Starting app list polling");
            poller.start();
            slot.insert(poller);
        }
    }
}

/// Polls every known and discovered host until a shutdown signal arrives.
pub(crate) async fn watch(config: ClientConfig) -> Result<()> {
    let manager = open_manager(config).await?;
    manager.start_polling(Arc::new(log_update));

    let mut app_pollers = HashMap::new();
    let mut sweep = interval(manager.config().polling.status_period());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = sweep.tick() => sync_app_pollers(&manager, &mut app_pollers),
        }
    }

    info!("Received shutdown, stopping polling");
    drop(app_pollers);
    manager.stop_polling();
    manager.wait_for_polling_stopped().await;
    manager.shutdown();
    Ok(())
}

pub(crate) async fn add(config: ClientConfig, address: IpAddr) -> Result<()> {
    let manager = open_manager(config).await?;
    let added = manager.add_host_blocking(address).await;
    if added {
        for host in manager
            .hosts()
            .iter()
            .filter(|h| h.local_ip == address || h.remote_ip == address)
        {
            print_host(host);
        }
    }
    manager.shutdown();
    if !added {
        bail!("No host could be added at {address}");
    }
    Ok(())
}

pub(crate) async fn list(config: ClientConfig) -> Result<()> {
    let manager = open_manager(config).await?;
    for host in &manager.hosts() {
        print_host(host);
    }
    manager.shutdown();
    Ok(())
}

pub(crate) async fn remove(config: ClientConfig, name: &str) -> Result<()> {
    let manager = open_manager(config).await?;
    let removed = manager.remove_host(name).await;
    manager.shutdown();
    if !removed {
        bail!("No host called '{name}'");
    }
    println!("Removed {name}");
    Ok(())
}
