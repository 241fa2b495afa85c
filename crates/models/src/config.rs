use serde::{Deserialize, Serialize};

/// Ledger configuration of a material node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory holding the embedded store.
    pub data_directory: std::path::PathBuf,
    /// Whether sealed pulses are replicated to the heavy node.
    pub heavy_sync_enabled: bool,
    /// Per-jet record count above which a drop marks its jet for split.
    pub split_threshold: u64,
    /// How many pulses a light node retains before cleanup.
    pub light_chain_limit: u32,
    /// Maximum pulses batched into a single replication message.
    pub heavy_sync_message_limit: usize,
    /// Extra pulses of slack before cleanup of evicted indexes.
    pub cleaner_delay: u32,
    /// Store transaction retries before a conflict surfaces.
    pub tx_retries_on_conflict: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_directory: "data".into(),
            heavy_sync_enabled: true,
            split_threshold: 10,
            light_chain_limit: 5,
            heavy_sync_message_limit: 30,
            cleaner_delay: 3,
            tx_retries_on_conflict: 3,
        }
    }
}
