use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the engine and its stores.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on every store call; exceeding it is a retryable failure.
    pub store_timeout: Duration,
    /// How long a rendered block snapshot stays redeemable.
    pub snapshot_ttl: Duration,
    /// Reject a calendar save whose snapshot no longer matches stored blocks.
    pub reject_stale_snapshots: bool,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends before the durable store rewrites its log.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(3),
            snapshot_ttl: Duration::from_secs(30 * 60),
            reject_stale_snapshots: false,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl EngineConfig {
    /// Read `LODGING_*` variables, keeping the default for anything absent or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            store_timeout: parsed("LODGING_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            snapshot_ttl: parsed("LODGING_SNAPSHOT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.snapshot_ttl),
            reject_stale_snapshots: lookup("LODGING_REJECT_STALE_SNAPSHOTS")
                .map(|s| matches!(s.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.reject_stale_snapshots),
            data_dir: lookup("LODGING_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("LODGING_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: parsed("LODGING_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    /// Path of the restriction log inside `data_dir`.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("restrictions.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.store_timeout, Duration::from_secs(3));
        assert_eq!(cfg.snapshot_ttl, Duration::from_secs(1800));
        assert!(!cfg.reject_stale_snapshots);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.compact_threshold, 1000);
    }

    #[test]
    fn reads_overrides() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("LODGING_STORE_TIMEOUT_MS", "250"),
            ("LODGING_SNAPSHOT_TTL_SECS", "60"),
            ("LODGING_REJECT_STALE_SNAPSHOTS", "true"),
            ("LODGING_DATA_DIR", "/var/lib/lodging"),
            ("LODGING_METRICS_PORT", "9100"),
            ("LODGING_COMPACT_THRESHOLD", "50"),
        ]));
        assert_eq!(cfg.store_timeout, Duration::from_millis(250));
        assert_eq!(cfg.snapshot_ttl, Duration::from_secs(60));
        assert!(cfg.reject_stale_snapshots);
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/lodging/restrictions.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("LODGING_STORE_TIMEOUT_MS", "soon"),
            ("LODGING_METRICS_PORT", "99999"),
        ]));
        assert_eq!(cfg.store_timeout, Duration::from_secs(3));
        assert_eq!(cfg.metrics_port, None);
    }
}
