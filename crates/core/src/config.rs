use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

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

/// Read a profiled var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: &dyn Fn(&str) -> Option<String>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

fn profiled_usize(
    lookup: &dyn Fn(&str) -> Option<String>,
    profile: &str,
    key: &str,
    default: usize,
) -> usize {
    profiled_opt(lookup, profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ── Debug mask ────────────────────────────────────────────────

/// Verbosity mask selecting which scheduler events are logged at debug level.
///
/// The mask only gates emission; `RUST_LOG` still decides whether debug
/// output reaches the subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebugFlags(u32);

impl DebugFlags {
    /// Schedule, claim and finalize transitions.
    pub const FLOW: DebugFlags = DebugFlags(0x1);
    /// Queue push/pop under the queue lock.
    pub const LOCK: DebugFlags = DebugFlags(0x2);
    /// State word values around each CAS.
    pub const STATUS: DebugFlags = DebugFlags(0x4);
    /// Per-run callback duration.
    pub const TIMING: DebugFlags = DebugFlags(0x8);
    /// Worker park and wake.
    pub const WORKER: DebugFlags = DebugFlags(0x10);

    pub const fn empty() -> Self {
        DebugFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        DebugFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: DebugFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Parse `0x1f`-style hex or plain decimal.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let bits = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => s.parse().ok()?,
        };
        Some(DebugFlags(bits))
    }
}

impl FromStr for DebugFlags {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ClusterError::Config(format!("invalid debug mask: {:?}", s)))
    }
}

impl std::ops::BitOr for DebugFlags {
    type Output = DebugFlags;

    fn bitor(self, rhs: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for DebugFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Parse a mask read from the environment, warning and falling back to an
/// empty mask when it is malformed.
fn debug_mask_or_empty(raw: &str) -> DebugFlags {
    match raw.parse::<DebugFlags>() {
        Ok(mask) => mask,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring CLUSTER_DEBUG");
            DebugFlags::empty()
        }
    }
}

// ── Cluster config ────────────────────────────────────────────

/// Scheduler configuration, read once when the cluster registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    /// Worker threads spawned per cluster.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// Maximum nodes a worker claims per wake.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Debug log mask.
    #[serde(default)]
    pub debug: DebugFlags,
}

fn default_thread_count() -> usize { 1 }
fn default_batch_size() -> usize { 1 }

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            thread_count: default_thread_count(),
            batch_size: default_batch_size(),
            debug: DebugFlags::empty(),
        }
    }
}

impl ClusterConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CLUSTER_PROFILE`. When set (e.g. `BENCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CLUSTER_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        Self::from_lookup(profile, &env_opt)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(profile: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let debug = profiled_opt(lookup, p, "CLUSTER_DEBUG")
            .map(|v| debug_mask_or_empty(&v))
            .unwrap_or_default();
        Self {
            profile: p.to_string(),
            thread_count: profiled_usize(lookup, p, "CLUSTER_THREAD_COUNT", default_thread_count()).max(1),
            batch_size: profiled_usize(lookup, p, "CLUSTER_BATCH_SIZE", default_batch_size()).max(1),
            debug,
        }
    }

    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Cluster config loaded (profile: {}):", self.profile_label());
        tracing::info!("  threads:     {} per cluster", self.thread_count);
        tracing::info!("  batch:       {} nodes per wake", self.batch_size);
        tracing::info!("  debug:       {}", self.debug);
    }

    /// Return a JSON view of the config.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "thread_count": self.thread_count,
            "batch_size": self.batch_size,
            "debug": self.debug.bits(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_vars() {
        let cfg = ClusterConfig::from_lookup("", &lookup_from(&[]));
        assert_eq!(cfg, ClusterConfig::default());
        assert_eq!(cfg.thread_count, 1);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.debug, DebugFlags::empty());
        assert_eq!(cfg.profile_label(), "default");
    }

    #[test]
    fn reads_plain_keys() {
        let lookup = lookup_from(&[
            ("CLUSTER_THREAD_COUNT", "4"),
            ("CLUSTER_BATCH_SIZE", "8"),
            ("CLUSTER_DEBUG", "0x11"),
        ]);
        let cfg = ClusterConfig::from_lookup("", &lookup);
        assert_eq!(cfg.thread_count, 4);
        assert_eq!(cfg.batch_size, 8);
        assert!(cfg.debug.contains(DebugFlags::FLOW));
        assert!(cfg.debug.contains(DebugFlags::WORKER));
        assert!(!cfg.debug.contains(DebugFlags::LOCK));
    }

    #[test]
    fn profile_overrides_plain_key() {
        let lookup = lookup_from(&[
            ("CLUSTER_THREAD_COUNT", "2"),
            ("BENCH_CLUSTER_THREAD_COUNT", "6"),
            ("CLUSTER_BATCH_SIZE", "3"),
        ]);
        let cfg = ClusterConfig::from_lookup("bench", &lookup);
        assert_eq!(cfg.profile, "BENCH");
        assert_eq!(cfg.thread_count, 6);
        // Falls back to the unprefixed key
        assert_eq!(cfg.batch_size, 3);
    }

    #[test]
    fn zero_and_garbage_clamp_to_defaults() {
        let lookup = lookup_from(&[
            ("CLUSTER_THREAD_COUNT", "0"),
            ("CLUSTER_BATCH_SIZE", "lots"),
            ("CLUSTER_DEBUG", "0xZZ"),
        ]);
        let cfg = ClusterConfig::from_lookup("", &lookup);
        assert_eq!(cfg.thread_count, 1);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.debug, DebugFlags::empty());
    }

    #[test]
    fn debug_flags_parse() {
        assert_eq!(DebugFlags::parse("16"), Some(DebugFlags::WORKER));
        assert_eq!(DebugFlags::parse("0X3"), Some(DebugFlags::FLOW | DebugFlags::LOCK));
        assert_eq!(DebugFlags::parse("nope"), None);
        assert!(!DebugFlags::empty().contains(DebugFlags::empty()));
    }

    #[test]
    fn debug_flags_from_str_reports_config_error() {
        assert_eq!("0x4".parse::<DebugFlags>(), Ok(DebugFlags::STATUS));
        let err = "verbose".parse::<DebugFlags>().unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn env_mask_uses_flag_parser() {
        assert_eq!(debug_mask_or_empty("0x11"), DebugFlags::FLOW | DebugFlags::WORKER);
        assert_eq!(debug_mask_or_empty(" 4 "), DebugFlags::STATUS);
        // Rejected by FromStr, so the env path ends up empty instead of failing
        assert!("0xZZ".parse::<DebugFlags>().is_err());
        assert_eq!(debug_mask_or_empty("0xZZ"), DebugFlags::empty());
    }

    #[test]
    fn summary_json() {
        let cfg = ClusterConfig::default()
            .with_thread_count(3)
            .with_debug(DebugFlags::TIMING);
        let json = cfg.summary();
        assert_eq!(json["profile"], "default");
        assert_eq!(json["thread_count"], 3);
        assert_eq!(json["debug"], 8);
    }

    #[test]
    fn builders_clamp_to_one() {
        let cfg = ClusterConfig::default().with_thread_count(0).with_batch_size(0);
        assert_eq!(cfg.thread_count, 1);
        assert_eq!(cfg.batch_size, 1);
    }
}
