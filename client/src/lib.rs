//! Library entry for the `streamhost` client.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the client logic,
//! and the [`HostManager`] with its collaborators for embedding the host tracker elsewhere.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod cache;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod host;
pub mod manager;
pub mod polling;
pub mod registry;
pub mod run;
#[cfg(test)]
mod testing;
pub mod transport;

use std::{env, path::Path, sync::Once};

use eyre::Result;
use tracing::{Instrument as _, info_span};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

pub use host::{HostRecord, HostState, Reachability};
pub use manager::{HostManager, HostObserver};
pub use polling::AppListPoller;

use cli::{Cli, Command, LogFormat};

static INIT_TRACING: Once = Once::new();

/// The client's main function; can be called from a shim binary.
///
/// Sets up logging, loads the config and dispatches the chosen command.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded, the registry cannot be opened,
/// or the command itself fails.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    let log_format = invocation.log_format;
    INIT_TRACING.call_once(move || {
        let default_level = if env::var("STREAMHOST_INTEGRATION_TEST").is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });

    let config_path = Path::new(&invocation.config);
    let startup_span = info_span!(
        "client",
        config = %config_path.display(),
        pid = ?std::process::id(),
        version = env!("CARGO_PKG_VERSION")
    );
    let config = run::load_config(config_path)
        .instrument(startup_span.clone())
        .await?;

    match invocation.command {
        Command::Watch => run::watch(config).instrument(startup_span).await,
        Command::Add { address } => run::add(config, address).instrument(startup_span).await,
        Command::List => run::list(config).instrument(startup_span).await,
        Command::Remove { name } => run::remove(config, &name).instrument(startup_span).await,
    }
}
