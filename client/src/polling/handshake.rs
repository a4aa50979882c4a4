//! One full reachability + server-info pass against a host.

use core::net::IpAddr;

use thiserror::Error as ThisError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use streamhost_common::ServerInfo;

use super::reachability::{classify, fast_poll};
use crate::{
    config::NetworkConfig,
    host::{HostRecord, HostSnapshot, Reachability},
    transport::{HostTransport, TransportError},
};

/// Addresses to try and the identity we expect to find there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollTarget {
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
    /// `None` for a host that was never contacted before.
    pub uuid: Option<Uuid>,
}

impl PollTarget {
    /// Target for a bare address of a host we know nothing about yet.
    pub(crate) const fn new_host(addr: IpAddr) -> Self {
        Self {
            local_ip: addr,
            remote_ip: addr,
            uuid: None,
        }
    }
}

impl From<&HostRecord> for PollTarget {
    fn from(record: &HostRecord) -> Self {
        Self {
            local_ip: record.local_ip,
            remote_ip: record.remote_ip,
            uuid: Some(record.uuid),
        }
    }
}

/// Reasons a single poll pass produced nothing.
#[derive(Debug, ThisError)]
pub(crate) enum PollError {
    #[error("no connection to {local} or {remote}")]
    Unreachable { local: IpAddr, remote: IpAddr },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("expected host {expected} but {found} answered")]
    UuidMismatch { expected: Uuid, found: Uuid },
    #[error("host did not report a UUID")]
    MissingUuid,
}

/// A handshake that succeeded, and what it says about the path we used.
#[derive(Debug)]
struct Reached {
    info: ServerInfo,
    addr: IpAddr,
    local_ip: IpAddr,
    remote_ip: IpAddr,
    reachability: Reachability,
}

impl Reached {
    fn new(info: ServerInfo, addr: IpAddr) -> Self {
        let local_ip = info.local_ip.unwrap_or(addr);
        let remote_ip = info.external_ip.unwrap_or(addr);
        let reachability = if remote_ip == addr {
            Reachability::Remote
        } else if local_ip == addr {
            Reachability::Local
        } else {
            Reachability::Unknown
        };
        Self {
            info,
            addr,
            local_ip,
            remote_ip,
            reachability,
        }
    }

    fn into_snapshot(self, expected: Option<Uuid>) -> Result<HostSnapshot, PollError> {
        let uuid = self.info.uuid.or(expected).ok_or(PollError::MissingUuid)?;
        Ok(HostSnapshot {
            uuid,
            name: self.info.hostname,
            mac: self.info.mac,
            local_ip: self.local_ip,
            remote_ip: self.remote_ip,
            reachability: self.reachability,
            pair_state: self.info.pair_status,
            running_app: self.info.current_game,
        })
    }
}

/// Probes `addr`, then fetches its server-info and checks it is the host we expect.
async fn try_poll_ip(
    transport: &dyn HostTransport,
    network: &NetworkConfig,
    expected: Option<Uuid>,
    addr: IpAddr,
) -> Result<ServerInfo, PollError> {
    if !fast_poll(transport, addr, network.fast_poll_timeout()).await {
        return Err(PollError::Unreachable {
            local: addr,
            remote: addr,
        });
    }

    let info = transport.server_info(addr).await?;
    if let (Some(expected), Some(found)) = (expected, info.uuid)
        && expected != found
    {
        warn!(%addr, %expected, %found, "Polling returned the wrong host");
        return Err(PollError::UuidMismatch { expected, found });
    }
    Ok(info)
}

async fn poll_for_reachability(
    transport: &dyn HostTransport,
    network: &NetworkConfig,
    target: &PollTarget,
) -> Result<Reached, PollError> {
    let &PollTarget {
        local_ip: local,
        remote_ip: remote,
        uuid,
    } = target;

    let verdict = classify(transport, local, remote, network.fast_poll_timeout()).await;
    if verdict == Reachability::Offline {
        return Err(PollError::Unreachable { local, remote });
    }

    let (first, fallback) = if verdict == Reachability::Local {
        (local, remote)
    } else {
        (remote, local)
    };

    match try_poll_ip(transport, network, uuid, first).await {
        Ok(info) => Ok(Reached::new(info, first)),
        Err(e) if local != remote => {
            debug!(%first, %fallback, "Handshake failed ({e}), trying the other address");
            let info = try_poll_ip(transport, network, uuid, fallback).await?;
            Ok(Reached::new(info, fallback))
        }
        Err(e) => Err(e),
    }
}

/// Runs one reachability + handshake pass against `target`.
///
/// When the host reports neither address we reached it on, its reported addresses are
/// polled once more; if those don't answer either, the working address is kept as
/// the local one.
pub(crate) async fn poll_host(
    transport: &dyn HostTransport,
    network: &NetworkConfig,
    target: &PollTarget,
) -> Result<HostSnapshot, PollError> {
    let mut reached = poll_for_reachability(transport, network, target).await?;

    if reached.reachability == Reachability::Unknown {
        let reported = PollTarget {
            local_ip: reached.local_ip,
            remote_ip: reached.remote_ip,
            uuid: reached.info.uuid.or(target.uuid),
        };
        match poll_for_reachability(transport, network, &reported).await {
            Ok(confirmed) => reached = confirmed,
            Err(e) => {
                info!(
                    addr = %reached.addr,
                    "Host is not reachable on its reported addresses ({e}); keeping the working one"
                );
                reached.local_ip = reached.addr;
                reached.reachability = Reachability::Local;
            }
        }
    }

    reached.into_snapshot(target.uuid)
}
