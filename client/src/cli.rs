//! Command-line interface definitions for the client.
//!
//! This module contains the CLI argument parsing structures and enums
//! used by the `streamhost` binary.

use core::net::IpAddr;
use std::env;

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file. A missing file means all defaults.
    #[arg(short, long, global = true, default_value = "streamhost.toml", env = "STREAMHOST_CONFIG")]
    pub config: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Track all known hosts, and hosts discovered on the local network, until interrupted.
    Watch,

    /// Contact the host at the given address once and register it.
    Add {
        /// IP address of the host.
        address: IpAddr,
    },

    /// Print every registered host.
    List,

    /// Forget a registered host.
    Remove {
        /// Name the host reported for itself.
        name: String,
    },
}

/// Formatter used for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}
