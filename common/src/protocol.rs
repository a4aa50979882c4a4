//! Protocol types for client-host communication.
//!
//! - The server-info handshake is answered by the host with a JSON [`ServerInfo`].
//! - Hosts announce themselves on the local network with a JSON [`DiscoveryAnnouncement`]
//!   sent as a single UDP datagram.

use core::{fmt, net::IpAddr, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Port the host's server-info and app-list endpoints listen on.
pub const DEFAULT_HTTPS_PORT: u16 = 47984;

/// UDP port hosts broadcast their discovery announcements to.
pub const DEFAULT_DISCOVERY_PORT: u16 = 47998;

/// MAC address some host versions report when they failed to determine their own.
pub const ZERO_MAC: &str = "00:00:00:00:00:00";

/// Returns `true` if `mac` is the all-zero placeholder address.
#[must_use]
pub fn is_zero_mac(mac: &str) -> bool {
    mac.eq_ignore_ascii_case(ZERO_MAC)
}

/// Cryptographic trust status between this client and a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    #[default]
    Unknown,
    NotPaired,
    Paired,
}

/// Payload returned by the server-info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Display name of the host.
    pub hostname: String,
    /// Stable identity of the host. Very old hosts omit it.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// MAC address of the host's primary interface.
    pub mac: String,
    /// Address the host believes it has on its local network.
    #[serde(default)]
    pub local_ip: Option<IpAddr>,
    /// Address the host believes it is reachable at from the internet.
    #[serde(default)]
    pub external_ip: Option<IpAddr>,
    #[serde(default)]
    pub pair_status: PairState,
    /// Id of the application currently being streamed, 0 if none.
    #[serde(default)]
    pub current_game: u32,
}

/// Datagram a host broadcasts when it comes up or is queried on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryAnnouncement {
    pub hostname: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
}

impl DiscoveryAnnouncement {
    /// Parses a raw discovery datagram.
    pub fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

// Macro to define the enum from variant => string mappings
macro_rules! define_enum_with_str {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $str:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $($name::$variant => f.write_str($str),)*
                }
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($str => Ok($name::$variant),)*
                    _ => Err(()),
                }
            }
        }
    };
}

define_enum_with_str! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// HTTP endpoints a host exposes on [`DEFAULT_HTTPS_PORT`].
    pub enum Endpoint {
        /// Identity and current status of the host
        ServerInfo => "serverinfo",
        /// Raw application catalog
        AppList => "applist",
    }
}
