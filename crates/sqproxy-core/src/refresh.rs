//! The three upstream refresh loops: info, players, and rules.
//!
//! Each iteration opens a fresh connected socket toward the upstream (spec
//! §4.3 step 1) rather than reusing one for the loop's whole lifetime, so a
//! wedged socket never needs the whole loop thread restarted to clear. All
//! three loops share a single `HealthState` (spec §5: "the HealthState is
//! written from all three refresh loops and read by the listener") and a
//! single cache. Structurally this is the teacher's `udp_io_loop` -- a
//! `shutdown: Arc<AtomicBool>` polled between blocking calls -- generalized
//! from a fixed poll tick to per-loop request/refresh intervals.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::cache::{AwaitableCache, CacheKey};
use crate::challenge::{send_recv_request, NO_CHALLENGE};
use crate::codec::{InfoRequest, PlayersRequest, Request, Response, RulesRequest};
use crate::error::RefreshError;
use crate::health::HealthState;
use crate::transport::DatagramTransport;

/// Tunables shared by all three loops, resolved from configuration (spec
/// §3/§6). Per-kind cache lifetimes live alongside these in `ProxyConfig`.
#[derive(Debug, Clone, Copy)]
pub struct RefreshConfig {
    pub server_addr: SocketAddrV4,
    pub response_timeout: Duration,
    pub fail_threshold: u32,
}

/// Sleep in short slices so a shutdown request is noticed promptly instead
/// of after a whole (possibly long) refresh interval. Returns `true` if
/// shutdown was observed.
fn sleep_or_shutdown(shutdown: &AtomicBool, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(100);
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(remaining.min(SLICE));
    }
}

pub fn run_info_loop(
    config: RefreshConfig,
    cache_lifetime: Duration,
    cache: Arc<AwaitableCache>,
    health: Arc<Mutex<HealthState>>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), RefreshError> {
    let timeout = config.response_timeout.max(cache_lifetime);

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        match DatagramTransport::connect(config.server_addr) {
            Ok(transport) => {
                let request = Request::Info(InfoRequest::default());
                match send_recv_request(&transport, request, timeout) {
                    Ok((Response::Info(_), raw)) => {
                        cache.set(CacheKey::Info, raw);
                        health.lock().ok(now);
                    }
                    Ok((other, _)) => {
                        debug!(?other, "info refresh got an unexpected response kind");
                        health.lock().fail(now);
                    }
                    Err(err) => {
                        error!(error = %err, "info refresh failed");
                        health.lock().fail(now);
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "failed to open a socket toward upstream");
                health.lock().fail(now);
            }
        }

        if sleep_or_shutdown(&shutdown, cache_lifetime) {
            break;
        }
    }
    info!("info refresh loop stopped");
    Ok(())
}

pub fn run_players_loop(
    config: RefreshConfig,
    cache_lifetime: Duration,
    cache: Arc<AwaitableCache>,
    health: Arc<Mutex<HealthState>>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), RefreshError> {
    let timeout = config.response_timeout.max(cache_lifetime);

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        match DatagramTransport::connect(config.server_addr) {
            Ok(transport) => {
                let request = Request::Players(PlayersRequest { challenge: NO_CHALLENGE });
                match send_recv_request(&transport, request, timeout) {
                    Ok((Response::Players(_), raw)) => {
                        cache.set(CacheKey::Players, raw);
                        health.lock().ok(now);
                    }
                    Ok((other, _)) => {
                        debug!(?other, "players refresh got an unexpected response kind");
                        health.lock().fail(now);
                    }
                    Err(err) => {
                        error!(error = %err, "players refresh failed");
                        health.lock().fail(now);
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "failed to open a socket toward upstream");
                health.lock().fail(now);
            }
        }

        if sleep_or_shutdown(&shutdown, cache_lifetime) {
            break;
        }
    }
    info!("players refresh loop stopped");
    Ok(())
}

pub fn run_rules_loop(
    config: RefreshConfig,
    cache_lifetime: Duration,
    cache: Arc<AwaitableCache>,
    health: Arc<Mutex<HealthState>>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), RefreshError> {
    let timeout = config.response_timeout.max(cache_lifetime);

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        match DatagramTransport::connect(config.server_addr) {
            Ok(transport) => {
                let request = Request::Rules(RulesRequest { challenge: NO_CHALLENGE });
                match send_recv_request(&transport, request, timeout) {
                    Ok((Response::Rules(_), raw)) => {
                        cache.set(CacheKey::Rules, raw);
                        health.lock().ok(now);
                    }
                    Ok((other, _)) => {
                        debug!(?other, "rules refresh got an unexpected response kind");
                        health.lock().fail(now);
                    }
                    Err(err) => {
                        error!(error = %err, "rules refresh failed");
                        health.lock().fail(now);
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "failed to open a socket toward upstream");
                health.lock().fail(now);
            }
        }

        if sleep_or_shutdown(&shutdown, cache_lifetime) {
            break;
        }
    }
    info!("rules refresh loop stopped");
    Ok(())
}
