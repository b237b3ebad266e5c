//! Millrace server binary.
//!
//! Configuration layering: defaults, then environment variables, then
//! command-line flags.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use millrace_core::config::MillraceConfig;
use millrace_core::tracing_setup::{CliLogLevel, init_tracing};
use millrace_server::run_server;

#[derive(Parser)]
#[command(name = "millrace")]
#[command(about = "A static content server with byte-range and conditional request support")]
struct Cli {
    /// Address to bind, e.g. 127.0.0.1:8080
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory to serve
    #[arg(long)]
    root: Option<PathBuf>,

    /// Maximum concurrent in-flight requests
    #[arg(long)]
    concurrency_limit: Option<usize>,

    /// Console log level
    #[arg(long, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for full debug logs (file logging off when omitted)
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Enable permissive CORS headers
    #[arg(long)]
    cors: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    let mut config = MillraceConfig::from_env();
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(root) = cli.root {
        config.server.content_root = root;
    }
    if let Some(limit) = cli.concurrency_limit {
        config.runtime.concurrency_limit = limit;
    }
    if cli.cors {
        config.server.enable_cors = true;
    }

    run_server(config).await
}
