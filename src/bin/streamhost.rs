//! Shim binary that calls into the `streamhost_client` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    streamhost_client::inner_main(streamhost_client::cli::Cli::parse()).await
}
