//! wfsgate CLI.
//!
//! `serve` runs the gateway HTTP server; `check-store` parses a layer store
//! and prints what the gateway would serve from it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use wfsgate::registry::LayerStoreCache;
use wfsgate::{GatewayConfig, RequestValidator};
use wfsgate_telemetry::{LogFormat, Telemetry, TelemetryConfig};

mod api;
mod error;
mod server;

#[derive(Parser, Debug)]
#[command(name = "wfsgate", about = "WFS / WFS-T access gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the gateway HTTP server.
    ///
    /// Upstream settings (timeouts, retries, limits, auth) come from the
    /// WFS_* environment variables.
    Serve {
        /// Listen address.
        #[arg(long, env = "WFSGATE_LISTEN", default_value = "127.0.0.1:3002")]
        listen: SocketAddr,

        /// Path to the JSON layer store.
        #[arg(long, env = "WFSGATE_LAYER_STORE")]
        store: PathBuf,

        /// Log level (overridden by RUST_LOG).
        #[arg(long, env = "WFSGATE_LOG_LEVEL", default_value = "info")]
        log_level: String,

        /// Log format: json or pretty.
        #[arg(long, env = "WFSGATE_LOG_FORMAT", default_value = "json")]
        log_format: String,

        /// Trusted request header carrying the calling user.
        #[arg(long, env = "WFSGATE_USER_HEADER", default_value = "X-Control-Header")]
        user_header: String,

        /// Hide layers the calling user's groups may not see.
        #[arg(long, env = "WFSGATE_WASH_CONTENT")]
        wash_content: bool,

        /// JSON file mapping users to groups.
        #[arg(long, env = "WFSGATE_GROUPS_FILE")]
        groups: Option<PathBuf>,
    },

    /// Parse a layer store and list its layers.
    CheckStore {
        /// Path to the JSON layer store.
        #[arg(long)]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            listen,
            store,
            log_level,
            log_format,
            user_header,
            wash_content,
            groups,
        } => {
            let Some(format) = LogFormat::parse(&log_format) else {
                eprintln!("error: unknown log format: {log_format}");
                return ExitCode::from(1);
            };
            let telemetry_config = TelemetryConfig::new()
                .with_log_level(log_level)
                .with_log_format(format);
            let telemetry = match Telemetry::init(telemetry_config) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(1);
                }
            };

            let gateway = match GatewayConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(1);
                }
            };

            let config = server::ServerConfig {
                listen_addr: listen,
                store_path: store,
                user_header,
                wash_content,
                groups_file: groups,
                gateway,
            };
            match server::run(config, telemetry.metrics_clone()).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    ExitCode::from(1)
                }
            }
        }

        Command::CheckStore { store } => run_check_store(&store),
    }
}

/// Exit codes: 1 = unreadable or invalid store, 2 = some layer URLs fail the
/// SSRF policy.
fn run_check_store(path: &Path) -> ExitCode {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", path.display());
            return ExitCode::from(1);
        }
    };
    let store = match LayerStoreCache::parse(&text, SystemTime::now()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };
    let validator = RequestValidator::new(config.allowed_hosts, config.max_limit);

    let mut unsafe_urls = 0;
    for layer in store.layers() {
        let verdict = if validator.is_valid_url(&layer.url, true) {
            "ok"
        } else {
            unsafe_urls += 1;
            "UNSAFE URL"
        };
        println!(
            "{}\t{}\t{}\t[{}]\t{}",
            layer.id,
            layer.caption,
            layer.url,
            layer.layers.join(", "),
            verdict
        );
    }
    println!("{} layer(s)", store.len());

    if unsafe_urls > 0 {
        eprintln!("error: {unsafe_urls} layer(s) with unsafe URLs");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
