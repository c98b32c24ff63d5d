use serde::{Deserialize, Serialize};

/// Streaming coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordConfig {
    /// Identity of the local cluster inside a replicate configuration.
    pub cluster_id: String,
    /// WAL topic naming scheme, from which the channel provider derives the
    /// initial pchannel set.
    #[serde(default)]
    pub wal: WalTopicsConfig,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            cluster_id: "petrel-dev".into(),
            wal: WalTopicsConfig::default(),
        }
    }
}

impl CoordConfig {
    /// All pchannel topic names declared by this configuration, sorted.
    pub fn all_topics(&self) -> Vec<String> {
        self.wal.all_topics()
    }
}

/// WAL topic layout: `<topic_prefix>_<i>` for `i` in `0..topic_count`.
/// Raising `topic_count` at runtime is how new pchannels enter the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalTopicsConfig {
    pub topic_prefix: String,
    pub topic_count: usize,
}

impl Default for WalTopicsConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "petrel-wal".into(),
            topic_count: 16,
        }
    }
}

impl WalTopicsConfig {
    pub fn all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = (0..self.topic_count)
            .map(|i| format!("{}_{}", self.topic_prefix, i))
            .collect();
        topics.sort();
        topics
    }
}
