//! Caching gateway daemon.

// crates.io
use clap::Parser;
// self
use cache_gateway::server::{self, DaemonArgs};

#[tokio::main]
async fn main() -> cache_gateway::Result<()> {
	server::init_tracing();
	server::run(DaemonArgs::parse()).await
}
