//! `QueryProxy`: wires the cache, the shared health tracker, the three
//! refresh loops, and the listener into one running proxy instance.
//!
//! `run()` plays the supervisor role the teacher's `NetIoThreadManager`
//! plays for its I/O thread (spawn, track a shutdown flag, join on `Drop`),
//! generalized to four threads instead of one. `wait_ready()` is the
//! bootstrap gate of spec §4.8: callers block until every enabled query
//! kind has a first cached value, or until the grace period runs out.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info, warn, Span};

use crate::cache::{AwaitableCache, CacheKey};
use crate::health::HealthState;
use crate::listener;
use crate::refresh::{self, RefreshConfig};

/// Everything needed to start one proxy instance, already resolved from
/// configuration -- no YAML or env-var knowledge lives below this line
/// (spec §6, SPEC_FULL §1).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub name: String,
    pub bind_addr: SocketAddrV4,
    pub server_addr: SocketAddrV4,
    pub response_timeout: Duration,
    pub info_cache_lifetime: Duration,
    pub players_cache_lifetime: Duration,
    pub rules_cache_lifetime: Duration,
    pub no_a2s_rules: bool,
    pub max_fails_before_offline: u32,
    pub wait_ready_graceful_period: Duration,
}

pub struct QueryProxy {
    config: ProxyConfig,
    cache: Arc<AwaitableCache>,
    health: Arc<Mutex<HealthState>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    span: Span,
}

impl QueryProxy {
    pub fn new(config: ProxyConfig) -> Self {
        let health = Arc::new(Mutex::new(HealthState::new(
            config.name.clone(),
            config.max_fails_before_offline,
        )));
        let span = tracing::info_span!("proxy", name = %config.name);
        QueryProxy {
            config,
            cache: AwaitableCache::new(),
            health,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            span,
        }
    }

    /// Spawn the listener and all three refresh loops (skipping rules if
    /// `no_a2s_rules`). Each thread restarts its loop if it returns an
    /// error, logging instead of taking the whole proxy down (SPEC_FULL
    /// §4.8) -- a single bad packet or a transient upstream hiccup should
    /// never kill the process.
    pub fn run(&mut self) {
        let _enter = self.span.enter();
        info!(
            bind = %self.config.bind_addr,
            server = %self.config.server_addr,
            "starting query proxy"
        );

        let refresh_config = RefreshConfig {
            server_addr: self.config.server_addr,
            response_timeout: self.config.response_timeout,
            fail_threshold: self.config.max_fails_before_offline,
        };

        self.threads.push(self.spawn_supervised("info", {
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let shutdown = Arc::clone(&self.shutdown);
            let lifetime = self.config.info_cache_lifetime;
            move || {
                refresh::run_info_loop(
                    refresh_config,
                    lifetime,
                    Arc::clone(&cache),
                    Arc::clone(&health),
                    Arc::clone(&shutdown),
                )
            }
        }));

        self.threads.push(self.spawn_supervised("players", {
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let shutdown = Arc::clone(&self.shutdown);
            let lifetime = self.config.players_cache_lifetime;
            move || {
                refresh::run_players_loop(
                    refresh_config,
                    lifetime,
                    Arc::clone(&cache),
                    Arc::clone(&health),
                    Arc::clone(&shutdown),
                )
            }
        }));

        if !self.config.no_a2s_rules {
            self.threads.push(self.spawn_supervised("rules", {
                let cache = Arc::clone(&self.cache);
                let health = Arc::clone(&self.health);
                let shutdown = Arc::clone(&self.shutdown);
                let lifetime = self.config.rules_cache_lifetime;
                move || {
                    refresh::run_rules_loop(
                        refresh_config,
                        lifetime,
                        Arc::clone(&cache),
                        Arc::clone(&health),
                        Arc::clone(&shutdown),
                    )
                }
            }));
        }

        let bind_addr = self.config.bind_addr;
        self.threads.push(self.spawn_supervised("listener", {
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let shutdown = Arc::clone(&self.shutdown);
            move || {
                listener::run_listener(
                    bind_addr,
                    Arc::clone(&cache),
                    Arc::clone(&health),
                    Arc::clone(&shutdown),
                )
            }
        }));
    }

    /// Spawns `task` on its own OS thread, re-entering this proxy's span
    /// there -- `Span::enter`'s guard is thread-local and does not cross
    /// `thread::spawn`, so every spawned loop/listener thread must re-enter
    /// it itself for its log lines to carry the proxy's `name` field
    /// (SPEC_FULL §6).
    fn spawn_supervised<E, F>(&self, label: &'static str, mut task: F) -> JoinHandle<()>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<(), E> + Send + 'static,
    {
        let shutdown = Arc::clone(&self.shutdown);
        let span = self.span.clone();
        thread::Builder::new()
            .name(format!("sqproxy-{label}"))
            .spawn(move || {
                let _enter = span.enter();
                while !shutdown.load(Ordering::Relaxed) {
                    if let Err(err) = task() {
                        error!(loop_name = label, error = %err, "loop exited with an error, restarting");
                        thread::sleep(Duration::from_millis(500));
                    }
                }
            })
            .expect("failed to spawn proxy thread")
    }

    /// Block until every enabled query kind has been populated at least
    /// once, or `wait_ready_graceful_period` elapses. Returns `false` on
    /// timeout so callers can decide whether to serve degraded or abort
    /// startup -- the proxy itself still runs either way (spec §4.8).
    pub fn wait_ready(&self) -> bool {
        let deadline = Instant::now() + self.config.wait_ready_graceful_period;
        for key in AwaitableCache::keys() {
            if key == CacheKey::Rules && self.config.no_a2s_rules {
                continue;
            }
            if !self.cache.wait(key, deadline) {
                warn!(?key, "timed out waiting for initial cache population");
                return false;
            }
        }
        true
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn cache(&self) -> &Arc<AwaitableCache> {
        &self.cache
    }

    pub fn health(&self) -> &Arc<Mutex<HealthState>> {
        &self.health
    }
}

impl Drop for QueryProxy {
    fn drop(&mut self) {
        self.shutdown();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
