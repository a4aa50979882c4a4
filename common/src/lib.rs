//! Wire types shared between the streaming client and host implementations.
//!
//! This crate provides:
//! - The server-info handshake payload and pairing state
//! - The application catalog format and its parser
//! - Discovery announcements broadcast by hosts on the local network
#![expect(
    clippy::missing_errors_doc,
    reason = "The situation it maps to errors should be obvious."
)]
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

mod catalog;
mod protocol;

pub use catalog::*;
pub use protocol::*;
