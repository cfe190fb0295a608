use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::BookingPolicy;

/// Server settings, read once from `CARREL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub reaper_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub policy: BookingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "carrel".into(),
            max_connections: 256,
            compact_threshold: 1000,
            reaper_interval: Duration::from_secs(30),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            policy: BookingPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| lookup(key).and_then(|v| parse_flag(&v)).unwrap_or(default);

        Self {
            bind: lookup("CARREL_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "CARREL_PORT", defaults.port),
            data_dir: lookup("CARREL_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("CARREL_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(&lookup, "CARREL_MAX_CONNECTIONS", defaults.max_connections),
            compact_threshold: parse_or(&lookup, "CARREL_COMPACT_THRESHOLD", defaults.compact_threshold),
            reaper_interval: parse_var::<u64>(&lookup, "CARREL_REAPER_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            metrics_port: parse_var(&lookup, "CARREL_METRICS_PORT"),
            tls_cert: lookup("CARREL_TLS_CERT"),
            tls_key: lookup("CARREL_TLS_KEY"),
            policy: BookingPolicy {
                reject_started_slots: flag("CARREL_REJECT_STARTED_SLOTS", defaults.policy.reject_started_slots),
                walk_in_blocks: flag("CARREL_WALK_IN_BLOCKS", defaults.policy.walk_in_blocks),
            },
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    parse_var(lookup, key).unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
