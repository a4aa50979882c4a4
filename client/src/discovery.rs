//! Local-network discovery of hosts.
//!
//! Discovery only produces candidate addresses; whether a candidate really is a host
//! is decided by the manager's add-host path.

use core::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use std::sync::{Mutex, PoisonError};

use tokio::{net::UdpSocket, sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info};

use streamhost_common::DiscoveryAnnouncement;

/// Sender candidate host addresses are reported on.
pub type CandidateTx = mpsc::UnboundedSender<IpAddr>;

/// Source of candidate host addresses.
pub trait Discovery: Send + Sync {
    /// Starts reporting candidates on `candidates`. Has no effect while already running.
    fn start(&self, candidates: CandidateTx);

    /// Stops reporting candidates. Has no effect while stopped.
    fn stop(&self);
}

/// Discovery for setups where only manually added hosts are wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

impl Discovery for NoDiscovery {
    fn start(&self, _candidates: CandidateTx) {}

    fn stop(&self) {}
}

/// Listens for UDP announcements hosts broadcast on the local network.
#[derive(Debug)]
pub struct BroadcastDiscovery {
    port: u16,
    running: Mutex<Option<CancellationToken>>,
}

impl BroadcastDiscovery {
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            running: Mutex::new(None),
        }
    }
}

impl Discovery for BroadcastDiscovery {
    fn start(&self, candidates: CandidateTx) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }
        let cancel = CancellationToken::new();
        tokio::spawn(listen(self.port, candidates, cancel.clone()).in_current_span());
        *running = Some(cancel);
    }

    fn stop(&self) {
        if let Some(cancel) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
    }
}

/// Background task: receives announcements until cancelled or nobody listens anymore.
async fn listen(port: u16, candidates: CandidateTx, cancel: CancellationToken) {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    loop {
        let socket = match UdpSocket::bind(addr).await {
            Ok(s) => {
                info!("Listening for host announcements on {addr}");
                s
            }
            Err(e) => {
                error!("Failed to bind discovery socket on {addr}: {e}");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = sleep(Duration::from_secs(5)) => continue,
                }
            }
        };

        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Discovery stopped");
                    return;
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, peer)) => {
                            let Some(data) = buf.get(..n) else {
                                unreachable!("Read data size should always be valid, as its <= buffer size");
                            };
                            if !handle_announcement(data, peer, &candidates) {
                                debug!("Candidate receiver dropped, stopping discovery");
                                return;
                            }
                        }
                        Err(e) => {
                            error!("UDP receive error on port {port}: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Forwards the sender of a valid announcement. Returns `false` once the receiver is gone.
fn handle_announcement(data: &[u8], peer: SocketAddr, candidates: &CandidateTx) -> bool {
    match DiscoveryAnnouncement::parse(data) {
        Ok(announcement) => {
            info!(
                host = %announcement.hostname,
                uuid = ?announcement.uuid,
                "Host announced itself from {peer}"
            );
            candidates.send(peer.ip()).is_ok()
        }
        Err(e) => {
            debug!("Ignoring malformed announcement from {peer}: {e}");
            true
        }
    }
}
