//! Application catalog served by a host.
//!
//! The catalog is kept and cached in its raw textual form; it is only parsed to
//! decide whether it actually lists any applications.

use serde::{Deserialize, Serialize};

/// A single launchable application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub hdr_supported: bool,
}

/// Parses a raw catalog payload (a JSON array of [`AppEntry`]).
pub fn parse_app_list(raw: &str) -> Result<Vec<AppEntry>, serde_json::Error> {
    serde_json::from_str(raw)
}
