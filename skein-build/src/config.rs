//! Embedder-facing runtime configuration (§6), distinct from a module
//! header's own `Pragmas` section: this is how the host process tunes
//! the orchestrator, not how a module tunes itself.
//!
//! Follows `lumen-cli`'s `LumenConfig` toml+serde+`Default` manifest
//! convention, scaled down to the handful of knobs this orchestrator
//! actually exposes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads behind the fiber `Scheduler`.
    pub worker_threads: usize,
    /// Where the repository archive persists its records. The archive
    /// itself is an in-memory abstraction in this core (§1); embedders
    /// backing it with real storage read this to pick a location.
    pub archive_directory: String,
    /// Whether a stored archive blob's source digest is recomputed and
    /// compared against the key it was stored under before trusting a
    /// replay (defends against a hand-edited or corrupted archive that
    /// still happens to carry a valid CRC32).
    pub verify_content_hash_on_read: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            archive_directory: ".skein-archive".to_string(),
            verify_content_hash_on_read: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_at_least_one_worker() {
        assert!(RuntimeConfig::default().worker_threads >= 1);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_for_omitted_fields() {
        let config = RuntimeConfig::from_toml("archive_directory = \"./cache\"\n").unwrap();
        assert_eq!(config.archive_directory, "./cache");
        assert!(config.verify_content_hash_on_read);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(RuntimeConfig::from_toml("not = [valid").is_err());
    }
}
