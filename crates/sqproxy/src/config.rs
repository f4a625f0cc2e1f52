//! Configuration loading: a directory of YAML fragments merged with a
//! `defaults` section at both the global and per-section level, the way the
//! original's `conf.d`-style loader does it, with `SQPROXY_CONFDIR_<N>`
//! environment variables naming the directories to scan (see
//! `original_source/source_query_proxy/config.py` and its test fixtures).

use std::collections::BTreeMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use sqproxy_core::ProxyConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid yaml in {path}: {source}")]
    Yaml { path: PathBuf, source: serde_yaml::Error },
    #[error("server '{0}' is defined in more than one config fragment")]
    DuplicateServer(String),
    #[error("'ebpf' is configured in more than one config fragment")]
    DuplicateEbpf,
    #[error("server '{name}' is missing required field '{field}'")]
    MissingField { name: String, field: &'static str },
    #[error("server '{name}' has an invalid value for '{field}': {detail}")]
    InvalidField { name: String, field: &'static str, detail: String },
}

/// List a directory's `*.yaml`/`*.yml` fragments in ascending filename
/// order -- `readdir` order is arbitrary and config merge order must be
/// deterministic.
fn iter_config_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Directories to scan, named by `SQPROXY_CONFDIR_0`, `SQPROXY_CONFDIR_1`,
/// ... in order. Stops at the first unset index. Nonexistent directories
/// are silently skipped (mirrors the original's tolerance for a stray
/// `SQPROXY_CONFDIR_1=unknown` in its test fixtures).
pub fn confdirs_from_env() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for index in 0.. {
        match std::env::var(format!("SQPROXY_CONFDIR_{index}")) {
            Ok(value) => dirs.push(PathBuf::from(value)),
            Err(_) => break,
        }
    }
    dirs
}

#[derive(Debug, Default, Deserialize)]
struct Fragment {
    #[serde(default)]
    defaults: Option<Mapping>,
    #[serde(default)]
    servers: BTreeMap<String, Mapping>,
    #[serde(default)]
    ebpf: Option<Mapping>,
}

/// Fill in `target`'s keys that are absent, from `defaults`. Shallow, same
/// as the original's `apply_defaults` -- a present key is never overwritten,
/// even with a nested value.
fn apply_defaults(target: &mut Mapping, defaults: &Mapping) {
    for (key, value) in defaults {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
        }
    }
}

pub struct MergedConfig {
    pub servers: BTreeMap<String, Mapping>,
    pub ebpf_enabled: bool,
}

/// Read and merge every fragment under `dirs`, applying global and
/// per-fragment defaults to each server entry.
pub fn load_merged(dirs: &[PathBuf]) -> Result<MergedConfig, ConfigError> {
    let mut fragments = Vec::new();
    for dir in dirs {
        for path in iter_config_files(dir).map_err(|source| ConfigError::Io { path: dir.clone(), source })? {
            let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
            let fragment: Fragment =
                serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml { path: path.clone(), source })?;
            fragments.push(fragment);
        }
    }

    let mut global_defaults = Mapping::new();
    for fragment in &fragments {
        if let Some(defaults) = &fragment.defaults {
            apply_defaults(&mut global_defaults, defaults);
        }
    }

    let mut servers: BTreeMap<String, Mapping> = BTreeMap::new();
    let mut ebpf_enabled = false;
    let mut ebpf_seen = false;

    for fragment in &fragments {
        for (name, raw_server) in &fragment.servers {
            if servers.contains_key(name) {
                return Err(ConfigError::DuplicateServer(name.clone()));
            }
            let mut server = raw_server.clone();
            if let Some(defaults) = &fragment.defaults {
                apply_defaults(&mut server, defaults);
            }
            apply_defaults(&mut server, &global_defaults);
            servers.insert(name.clone(), server);
        }

        if let Some(ebpf) = &fragment.ebpf {
            if ebpf_seen {
                return Err(ConfigError::DuplicateEbpf);
            }
            ebpf_seen = true;
            ebpf_enabled = ebpf
                .get(Value::String("enabled".to_string()))
                .and_then(Value::as_bool)
                .unwrap_or(false);
        }
    }

    Ok(MergedConfig { servers, ebpf_enabled })
}

fn field_str<'a>(server: &'a Mapping, path: &[&str], name: &str, field: &'static str) -> Result<&'a str, ConfigError> {
    lookup(server, path)
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingField { name: name.to_string(), field })
}

fn field_u16(server: &Mapping, path: &[&str], name: &str, field: &'static str) -> Result<u16, ConfigError> {
    lookup(server, path)
        .and_then(Value::as_u64)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| ConfigError::MissingField { name: name.to_string(), field })
}

fn field_u64(server: &Mapping, path: &[&str], default: u64) -> u64 {
    lookup(server, path).and_then(Value::as_u64).unwrap_or(default)
}

fn field_bool(server: &Mapping, path: &[&str], default: bool) -> bool {
    lookup(server, path).and_then(Value::as_bool).unwrap_or(default)
}

fn lookup<'a>(server: &'a Mapping, path: &[&str]) -> Option<&'a Value> {
    let mut value = server.get(path.first()?)?;
    for segment in &path[1..] {
        value = value.as_mapping()?.get(segment)?;
    }
    Some(value)
}

/// Resolve one merged server entry into a `ProxyConfig`, applying the
/// "`bind_port` 0 means pick one" rule (spec §6) -- the only piece of
/// config resolution that needs live socket probing, which is why it lives
/// in the binary crate rather than `sqproxy-core`.
pub fn resolve_server(name: &str, server: &Mapping) -> Result<ProxyConfig, ConfigError> {
    let server_ip = field_str(server, &["network", "server_ip"], name, "network.server_ip")?;
    let server_port = field_u16(server, &["network", "server_port"], name, "network.server_port")?;
    let bind_ip = lookup(server, &["network", "bind_ip"])
        .and_then(Value::as_str)
        .unwrap_or(server_ip);
    let bind_port = lookup(server, &["network", "bind_port"]).and_then(Value::as_u64).unwrap_or(0);

    let server_addr = parse_addr(server_ip, server_port, name, "network.server_ip")?;
    let resolved_bind_port = resolve_bind_port(bind_port as u16, server_port);
    let bind_addr = parse_addr(bind_ip, resolved_bind_port, name, "network.bind_ip")?;

    Ok(ProxyConfig {
        name: name.to_string(),
        bind_addr,
        server_addr,
        response_timeout: Duration::from_secs(field_u64(server, &["a2s_response_timeout"], 3)),
        info_cache_lifetime: Duration::from_secs(field_u64(server, &["a2s_info_cache_lifetime"], 5)),
        players_cache_lifetime: Duration::from_secs(field_u64(server, &["a2s_players_cache_lifetime"], 5)),
        rules_cache_lifetime: Duration::from_secs(field_u64(server, &["a2s_rules_cache_lifetime"], 30)),
        no_a2s_rules: field_bool(server, &["no_a2s_rules"], false),
        max_fails_before_offline: field_u64(server, &["max_a2s_fails_before_offline"], 3) as u32,
        wait_ready_graceful_period: Duration::from_secs(field_u64(server, &["wait_ready_graceful_period"], 10)),
    })
}

fn parse_addr(ip: &str, port: u16, name: &str, field: &'static str) -> Result<SocketAddrV4, ConfigError> {
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| ConfigError::InvalidField { name: name.to_string(), field, detail: ip.to_string() })?;
    Ok(SocketAddrV4::new(ip, port))
}

/// `0` (or absent) means pick automatically: try `server_port + 800` first
/// (a predictable, human-friendly choice operators can firewall for), and
/// fall back to an OS-assigned ephemeral port if that one's taken.
fn resolve_bind_port(configured: u16, server_port: u16) -> u16 {
    if configured != 0 {
        return configured;
    }
    let pretty = server_port.saturating_add(800);
    if pretty != 0 && is_port_available(pretty) {
        return pretty;
    }
    get_available_port()
}

fn is_port_available(port: u16) -> bool {
    UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

fn get_available_port() -> u16 {
    UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| socket.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(0)
}
