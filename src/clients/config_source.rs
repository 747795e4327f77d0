use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::domain::FloatConfig;

/// Read-only source of per-float configuration variables. The client/float
/// records are owned by an external admin surface; this crate never writes
/// them.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the configuration for one client-float pair.
    async fn float_config(&self, client_id: &str, float_id: &str)
        -> Result<Option<FloatConfig>>;

    /// List every client-float pair the nightly run should cover.
    async fn list_client_floats(&self) -> Result<Vec<FloatConfig>>;
}

/// Config source backed by a JSON file loaded once at startup.
pub struct StaticConfigSource {
    configs: HashMap<(String, String), FloatConfig>,
}

impl StaticConfigSource {
    pub fn new(configs: Vec<FloatConfig>) -> Self {
        Self {
            configs: configs
                .into_iter()
                .map(|c| ((c.client_id.clone(), c.float_id.clone()), c))
                .collect(),
        }
    }

    /// Load a JSON array of float configurations from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read float config {:?}", path.as_ref()))?;
        let configs: Vec<FloatConfig> =
            serde_json::from_str(&raw).context("Failed to parse float config JSON")?;
        Ok(Self::new(configs))
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn float_config(
        &self,
        client_id: &str,
        float_id: &str,
    ) -> Result<Option<FloatConfig>> {
        Ok(self
            .configs
            .get(&(client_id.to_string(), float_id.to_string()))
            .cloned())
    }

    async fn list_client_floats(&self) -> Result<Vec<FloatConfig>> {
        let mut floats: Vec<FloatConfig> = self.configs.values().cloned().collect();
        floats.sort_by(|a, b| {
            (&a.client_id, &a.float_id).cmp(&(&b.client_id, &b.float_id))
        });
        Ok(floats)
    }
}
