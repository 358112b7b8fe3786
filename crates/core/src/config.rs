use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::wire::constants;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_list(profile: &str, key: &str) -> Vec<String> {
    profiled_env_opt(profile, key)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["LISTEN_PORT", "CONTROL_SOCKET", "DEFAULT_FARM"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub listen: ListenConfig,
    pub control: ControlConfig,
    pub routing: RoutingConfig,
    pub buffer_pool: BufferPoolConfig,
    pub dns: DnsConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `AMQPPROX_PROFILE` env var. When set (e.g.
    /// `PROD`), every key is first looked up as `{PROFILE}_{KEY}`, falling
    /// back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("AMQPPROX_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            listen: ListenConfig::from_env_profiled(p),
            control: ControlConfig::from_env_profiled(p),
            routing: RoutingConfig::from_env_profiled(p),
            buffer_pool: BufferPoolConfig::from_env_profiled(p),
            dns: DnsConfig::from_env_profiled(p),
            session: SessionConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for
    /// `{PREFIX}_{MARKER_KEY}` patterns. Always includes "default".
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  listen:      {}:{}",
            self.listen.bind_address,
            self.listen.port
        );
        tracing::info!("  control:     socket={}", self.control.socket_path.display());
        tracing::info!(
            "  routing:     default_farm={:?}, datacenter={:?}",
            self.routing.default_farm,
            self.routing.datacenter
        );
        tracing::info!(
            "  buffer_pool: buckets={:?}",
            self.buffer_pool.bucket_sizes
        );
        tracing::info!(
            "  dns:         sweep_interval_ms={}",
            self.dns.sweep_interval_ms
        );
        tracing::info!(
            "  session:     heartbeat_secs={}, max_frame_size={}, connect_timeout_ms={}",
            self.session.heartbeat_secs,
            self.session.max_frame_size,
            self.session.connect_timeout_ms
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub bind_address: String,
    pub port: u16,
    /// PROXY protocol v1 header sent ahead of the AMQP preamble to backends.
    pub send_proxy_protocol: bool,
}

impl ListenConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bind_address: profiled_env_or(p, "LISTEN_ADDRESS", "0.0.0.0"),
            port: profiled_env_u16(p, "LISTEN_PORT", 5673),
            send_proxy_protocol: profiled_env_or(p, "SEND_PROXY_PROTOCOL", "false") == "true",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub socket_path: PathBuf,
}

impl ControlConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            socket_path: PathBuf::from(profiled_env_or(
                p,
                "CONTROL_SOCKET",
                "/tmp/amqpprox.sock",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub default_farm: Option<String>,
    pub datacenter: Option<String>,
    /// `name:host:port[:datacenter]` seed entries applied at startup, before
    /// any control-socket mutation.
    pub seed_backends: Vec<String>,
    /// `farm:selector:backend1,backend2,...` seed entries.
    pub seed_farms: Vec<String>,
    /// `vhost:farm-or-backend` seed entries.
    pub seed_mappings: Vec<String>,
}

impl RoutingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            default_farm: profiled_env_opt(p, "DEFAULT_FARM"),
            datacenter: profiled_env_opt(p, "DATACENTER"),
            seed_backends: profiled_env_list(p, "SEED_BACKENDS"),
            seed_farms: profiled_env_list(p, "SEED_FARMS"),
            seed_mappings: profiled_env_list(p, "SEED_MAPPINGS"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Sorted ascending bucket sizes in bytes; a request larger than the
    /// largest bucket spills over to a one-off allocation.
    pub bucket_sizes: Vec<usize>,
}

impl BufferPoolConfig {
    fn from_env_profiled(p: &str) -> Self {
        let sizes = profiled_env_opt(p, "BUFFER_POOL_BUCKETS")
            .map(|v| {
                v.split(',')
                    .filter_map(|s| s.trim().parse::<usize>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![256, 4096, 65536]);
        Self { bucket_sizes: sizes }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Interval at which the whole resolution cache is wiped (not a
    /// per-entry TTL — see the `DnsCache` doc comment).
    pub sweep_interval_ms: u64,
}

impl DnsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            sweep_interval_ms: profiled_env_u32(p, "DNS_SWEEP_INTERVAL_MS", 1000) as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub heartbeat_secs: u16,
    pub max_frame_size: u32,
    pub channel_max: u16,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub stats_interval_secs: u64,
}

impl SessionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let heartbeat_secs =
            profiled_env_u16(p, "HEARTBEAT_SECS", constants::DEFAULT_HEARTBEAT_SECS);
        Self {
            heartbeat_secs,
            max_frame_size: profiled_env_u32(p, "MAX_FRAME_SIZE", constants::MAX_FRAME_SIZE),
            channel_max: profiled_env_u16(p, "CHANNEL_MAX", constants::CHANNEL_MAX),
            connect_timeout_ms: profiled_env_usize(
                p,
                "CONNECT_TIMEOUT_MS",
                heartbeat_secs as usize * 1000,
            ) as u64,
            close_timeout_ms: profiled_env_u32(p, "CLOSE_TIMEOUT_MS", 5000) as u64,
            stats_interval_secs: profiled_env_u32(p, "STATS_INTERVAL_SECS", 1) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::for_profile("");
        assert_eq!(cfg.listen.port, 5673);
        assert_eq!(cfg.session.heartbeat_secs, 60);
        assert_eq!(cfg.session.max_frame_size, 131_072);
        assert_eq!(cfg.session.channel_max, 2047);
    }

    #[test]
    fn profile_prefix_overrides_default() {
        std::env::set_var("TESTPROFILE_LISTEN_PORT", "9999");
        let cfg = Config::for_profile("testprofile");
        assert_eq!(cfg.listen.port, 9999);
        std::env::remove_var("TESTPROFILE_LISTEN_PORT");
    }
}
