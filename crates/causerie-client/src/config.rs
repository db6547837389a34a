use std::path::PathBuf;
use std::time::Duration;

use causerie_shared::constants::{DEFAULT_DELIVERY_DELAY_MS, DEFAULT_READ_DELAY_MS};
use causerie_store::Database;

use crate::error::Result;
use crate::transport::{DeliveryTransport, NullTransport, SimulatedTransport};

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Directory holding `causerie.db`.
    /// Env: `CAUSERIE_DATA_DIR`
    /// Default: platform data directory (see [`Database::new`]).
    pub data_dir: Option<PathBuf>,

    /// Delay before a simulated "delivered" receipt.
    /// Env: `CAUSERIE_DELIVERY_DELAY_MS`
    /// Default: `1000`
    pub delivery_delay: Duration,

    /// Delay before a simulated "read" receipt.
    /// Env: `CAUSERIE_READ_DELAY_MS`
    /// Default: `3000`
    pub read_delay: Duration,

    /// How often the receipt pump polls the transport.
    /// Env: `CAUSERIE_RECEIPT_POLL_MS`
    /// Default: `250`
    pub receipt_poll_interval: Duration,

    /// Whether sent messages get simulated acknowledgements at all.
    /// Env: `CAUSERIE_SIMULATE_RECEIPTS` (true/false)
    /// Default: `true`
    pub simulate_receipts: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            delivery_delay: Duration::from_millis(DEFAULT_DELIVERY_DELAY_MS),
            read_delay: Duration::from_millis(DEFAULT_READ_DELAY_MS),
            receipt_poll_interval: Duration::from_millis(250),
            simulate_receipts: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("CAUSERIE_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(delay) = parse_millis(&lookup, "CAUSERIE_DELIVERY_DELAY_MS") {
            config.delivery_delay = delay;
        }

        if let Some(delay) = parse_millis(&lookup, "CAUSERIE_READ_DELAY_MS") {
            config.read_delay = delay;
        }

        if let Some(interval) = parse_millis(&lookup, "CAUSERIE_RECEIPT_POLL_MS") {
            if interval.is_zero() {
                tracing::warn!("CAUSERIE_RECEIPT_POLL_MS must be positive, using default");
            } else {
                config.receipt_poll_interval = interval;
            }
        }

        if let Some(val) = lookup("CAUSERIE_SIMULATE_RECEIPTS") {
            config.simulate_receipts = val != "false" && val != "0";
        }

        config
    }

    /// Open the database in the configured directory, or the platform
    /// default when none is set.
    pub fn open_database(&self) -> Result<Database> {
        let db = match &self.data_dir {
            Some(dir) => Database::open_in_dir(dir)?,
            None => Database::new()?,
        };
        Ok(db)
    }

    pub fn transport(&self) -> Box<dyn DeliveryTransport> {
        if self.simulate_receipts {
            Box::new(SimulatedTransport::new(self.delivery_delay, self.read_delay))
        } else {
            Box::new(NullTransport)
        }
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.delivery_delay, Duration::from_secs(1));
        assert_eq!(config.read_delay, Duration::from_secs(3));
        assert!(config.simulate_receipts);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CAUSERIE_DATA_DIR", "/tmp/causerie"),
            ("CAUSERIE_DELIVERY_DELAY_MS", "5"),
            ("CAUSERIE_READ_DELAY_MS", "10"),
            ("CAUSERIE_RECEIPT_POLL_MS", "20"),
            ("CAUSERIE_SIMULATE_RECEIPTS", "false"),
        ]);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/causerie")));
        assert_eq!(config.delivery_delay, Duration::from_millis(5));
        assert_eq!(config.read_delay, Duration::from_millis(10));
        assert_eq!(config.receipt_poll_interval, Duration::from_millis(20));
        assert!(!config.simulate_receipts);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("CAUSERIE_DELIVERY_DELAY_MS", "soon"),
            ("CAUSERIE_RECEIPT_POLL_MS", "0"),
        ]);
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_open_database_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ClientConfig::default()
        };

        let db = config.open_database().unwrap();
        assert!(db.path().is_some());
        assert!(dir.path().join("causerie.db").exists());
    }
}
