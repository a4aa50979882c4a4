//! Per-host polling: path selection, the server-info handshake and the two pollers
//! that share each host's network lock.

mod applist;
mod handshake;
mod reachability;
mod status;

pub use applist::AppListPoller;
pub(crate) use handshake::{PollTarget, poll_host};
pub use reachability::classify;
pub(crate) use status::run_status_loop;
