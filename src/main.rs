//! Caching forward proxy.
//!
//! ```text
//!   client ──GET──▶ ┌────────────┐   hit   ┌─────────────┐
//!                   │  session   │────────▶│ cache store │
//!   client ◀─body── │ controller │◀────────│  (on disk)  │
//!                   └─────┬──────┘         └──────▲──────┘
//!                    miss │                       │ tee
//!                         ▼                       │
//!                   ┌────────────┐  body   ┌──────┴──────┐
//!                   │   origin   │────────▶│    relay    │──▶ client
//!                   │ forwarder  │         └─────────────┘
//!                   └────────────┘
//! ```
//!
//! Usage: `cache-proxy <PORT> [--config FILE] [--cache-dir DIR] [--single-session]`

use std::path::PathBuf;

use clap::Parser;

use cache_proxy::lifecycle::startup::{self, StartupOptions};

#[derive(Parser, Debug)]
#[command(name = "cache-proxy")]
#[command(about = "Forward HTTP proxy that caches GET responses on disk", long_about = None)]
struct Cli {
    /// Port to listen on.
    port: u16,

    /// Optional TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for cached entries (overrides the config file).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Serve one connection, then exit.
    #[arg(long)]
    single_session: bool,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors are not failures.
            let _ = e.print();
            std::process::exit(0);
        }
    };

    let options = StartupOptions {
        port: cli.port,
        config_path: cli.config,
        cache_dir: cli.cache_dir,
        single_session: cli.single_session,
    };

    if let Err(e) = startup::run(options).await {
        println!("cache-proxy: {e}");
    }
}
