//! Picks the network path to a host with bare connects before any real request is made.

use core::{net::IpAddr, pin::pin, time::Duration};

use futures::future::{self, Either};
use tokio::time::timeout;
use tracing::debug;

use crate::{host::Reachability, transport::HostTransport};

/// A single connectivity check bounded by `probe_timeout`.
pub(crate) async fn fast_poll(
    transport: &dyn HostTransport,
    addr: IpAddr,
    probe_timeout: Duration,
) -> bool {
    matches!(timeout(probe_timeout, transport.probe(addr)).await, Ok(true))
}

/// Classifies how a host with the given addresses can currently be reached.
///
/// A host whose local address equals its remote one is publicly routable and is
/// always treated as [`Reachability::Remote`] without probing. Otherwise both
/// addresses are probed concurrently and the local path wins whenever it answers;
/// the remote result only matters once the local probe has failed.
///
/// Never returns [`Reachability::Unknown`].
pub async fn classify(
    transport: &dyn HostTransport,
    local: IpAddr,
    remote: IpAddr,
    probe_timeout: Duration,
) -> Reachability {
    if local == remote {
        return Reachability::Remote;
    }

    let local_probe = pin!(fast_poll(transport, local, probe_timeout));
    let remote_probe = pin!(fast_poll(transport, remote, probe_timeout));

    let verdict = match future::select(local_probe, remote_probe).await {
        Either::Left((true, _)) => Reachability::Local,
        Either::Left((false, remote_probe)) => {
            if remote_probe.await {
                Reachability::Remote
            } else {
                Reachability::Offline
            }
        }
        Either::Right((remote_ok, local_probe)) => {
            if local_probe.await {
                Reachability::Local
            } else if remote_ok {
                Reachability::Remote
            } else {
                Reachability::Offline
            }
        }
    };
    debug!(%local, %remote, ?verdict, "Fast poll finished");
    verdict
}
