//! Process entry point: load config, start one `QueryProxy` per configured
//! server, wait for each to report ready, then block until signalled to
//! stop.

mod config;
mod logging;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use sqproxy_core::QueryProxy;

#[derive(Debug, Parser)]
#[command(name = "sqproxy", about = "Caching A2S query proxy")]
struct Cli {
    /// Extra directory of YAML config fragments, in addition to any named
    /// by SQPROXY_CONFDIR_0, SQPROXY_CONFDIR_1, ... May be repeated.
    #[arg(long = "confdir")]
    confdirs: Vec<PathBuf>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let mut dirs = config::confdirs_from_env();
    dirs.extend(cli.confdirs);
    if dirs.is_empty() {
        error!("no config directories given (pass --confdir or set SQPROXY_CONFDIR_0)");
        std::process::exit(1);
    }

    let merged = match config::load_merged(&dirs) {
        Ok(merged) => merged,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if merged.ebpf_enabled {
        warn!("'ebpf.enabled' is set in config but eBPF acceleration is not implemented; ignoring");
    }

    if merged.servers.is_empty() {
        error!("no servers defined across the given config directories");
        std::process::exit(1);
    }

    let mut proxies = Vec::new();
    for (name, raw) in &merged.servers {
        let proxy_config = match config::resolve_server(name, raw) {
            Ok(config) => config,
            Err(err) => {
                error!(server = %name, error = %err, "skipping server with invalid config");
                continue;
            }
        };
        let mut proxy = QueryProxy::new(proxy_config);
        proxy.run();
        proxies.push((name.clone(), proxy));
    }

    if proxies.is_empty() {
        error!("every configured server had an invalid config; nothing to run");
        std::process::exit(1);
    }

    for (name, proxy) in &proxies {
        if !proxy.wait_ready() {
            warn!(server = %name, "starting degraded: not all query kinds populated within the grace period");
        } else {
            info!(server = %name, "ready");
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::Relaxed);
    }) {
        warn!(error = %err, "failed to install Ctrl-C handler; send SIGKILL to stop");
    }

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    info!("shutting down");
    for (_, proxy) in &proxies {
        proxy.shutdown();
    }
    drop(proxies);
}
