//! Host records tracked by the client.
//!
//! A [`HostRecord`] is created from the first successful handshake with a host and is
//! afterwards only changed by poll cycles, see [`HostRecord::merge`] and
//! [`HostRecord::mark_offline`].

use core::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use streamhost_common::{PairState, is_zero_mac};

/// Which network path currently reaches a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    #[default]
    Unknown,
    Local,
    Remote,
    Offline,
}

/// Host online/offline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// Everything the client knows about one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Stable identity; never changes once observed.
    pub uuid: Uuid,
    pub name: String,
    pub mac: Option<String>,
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
    pub reachability: Reachability,
    pub state: HostState,
    pub pair_state: PairState,
    /// Id of the application currently running on the host, 0 if none.
    pub running_app: u32,
    /// Last accepted raw application catalog.
    pub raw_app_list: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Result of one successful reachability + handshake pass against a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HostSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub mac: String,
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
    pub reachability: Reachability,
    pub pair_state: PairState,
    pub running_app: u32,
}

impl HostRecord {
    /// Creates the record for a host seen for the first time.
    pub(crate) fn from_snapshot(snapshot: HostSnapshot) -> Self {
        Self {
            uuid: snapshot.uuid,
            name: snapshot.name,
            mac: Some(snapshot.mac),
            local_ip: snapshot.local_ip,
            remote_ip: snapshot.remote_ip,
            reachability: snapshot.reachability,
            state: HostState::Online,
            pair_state: snapshot.pair_state,
            running_app: snapshot.running_app,
            raw_app_list: None,
            updated_at: Utc::now(),
        }
    }

    /// Address requests should go to, given the current reachability.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        match self.reachability {
            Reachability::Local => self.local_ip,
            Reachability::Remote | Reachability::Unknown | Reachability::Offline => self.remote_ip,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state == HostState::Online
    }

    /// Folds a fresh snapshot into this record and marks the host online.
    ///
    /// The UUID is left untouched. An all-zero MAC reported by the host does not
    /// replace one we already know.
    pub(crate) fn merge(&mut self, snapshot: HostSnapshot) {
        let mac = match self.mac.take() {
            Some(known) if is_zero_mac(&snapshot.mac) => {
                tracing::info!(host = %snapshot.name, %known, "MAC address was empty; keeping known value");
                known
            }
            _ => snapshot.mac,
        };
        self.name = snapshot.name;
        self.mac = Some(mac);
        self.local_ip = snapshot.local_ip;
        self.remote_ip = snapshot.remote_ip;
        self.reachability = snapshot.reachability;
        self.state = HostState::Online;
        self.pair_state = snapshot.pair_state;
        self.running_app = snapshot.running_app;
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_offline(&mut self) {
        self.state = HostState::Offline;
        self.reachability = Reachability::Offline;
        self.updated_at = Utc::now();
    }
}
