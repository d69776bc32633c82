//! Application state: blob storage, identity store, per-partition session stores,
//! the feedback generator and configuration.
//!
//! Partitions are opened lazily and cached, so every request touching the same
//! partition shares one `SessionStore` (and therefore one in-memory state).

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::anthropic::FeedbackGateway;
use crate::auth::IdentityStore;
use crate::config::{load_agent_config_from_env, AgentConfig, ModelSettings};
use crate::error::Result;
use crate::feedback::FeedbackGenerator;
use crate::session::{Partition, SessionStore};
use crate::storage::{BlobStore, DirBlobStore, MemoryBlobStore};

pub struct AppState<G = FeedbackGateway> {
    pub blobs: Arc<dyn BlobStore>,
    pub identity: IdentityStore,
    pub generator: G,
    pub config: AgentConfig,
    pub base_url: String,
    partitions: RwLock<HashMap<Partition, SessionStore>>,
}

impl AppState<FeedbackGateway> {
    /// Build state from env: load config, open storage, init the model gateway.
    #[instrument(level = "info", skip_all)]
    pub fn from_env(port: u16) -> Result<Self> {
        let config = load_agent_config_from_env().unwrap_or_default();

        let data_dir = std::env::var("LARA_DATA_DIR").unwrap_or_else(|_| "./data".into());
        let blobs: Arc<dyn BlobStore> = if data_dir == ":memory:" {
            info!(target: "lara_backend", "Using in-memory storage; state is lost on restart");
            Arc::new(MemoryBlobStore::new())
        } else {
            let store = DirBlobStore::open(&data_dir)?;
            info!(target: "lara_backend", dir = %store.dir().display(), "Using directory storage");
            Arc::new(store)
        };

        let settings = ModelSettings::from_env(&config.service);
        let generator = FeedbackGateway::from_settings(&settings, config.prompts.clone());
        if generator.is_configured() {
            info!(target: "lara_backend", base_url = %settings.base_url, model = %settings.model, "Feedback generation enabled.");
        } else {
            tracing::error!(target: "lara_backend", "ANTHROPIC_API_KEY not set; every feedback request will fail with a configuration error.");
        }

        let base_url = std::env::var("LARA_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));

        Ok(Self::new(blobs, generator, config, base_url))
    }
}

impl<G: FeedbackGenerator> AppState<G> {
    pub fn new(blobs: Arc<dyn BlobStore>, generator: G, config: AgentConfig, base_url: String) -> Self {
        Self {
            identity: IdentityStore::new(blobs.clone()),
            blobs,
            generator,
            config,
            base_url,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Shared store for `partition`, opened from storage on first use.
    pub async fn session(&self, partition: Partition) -> Result<SessionStore> {
        if let Some(store) = self.partitions.read().await.get(&partition) {
            return Ok(store.clone());
        }
        let mut partitions = self.partitions.write().await;
        if let Some(store) = partitions.get(&partition) {
            return Ok(store.clone());
        }
        let store = SessionStore::open(partition.clone(), self.blobs.clone())?;
        partitions.insert(partition, store.clone());
        Ok(store)
    }

    /// Never zero: `tokio::time::interval` rejects a zero period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.service.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubGenerator;

    #[tokio::test]
    async fn partitions_are_shared_per_key() {
        let state = AppState::new(
            Arc::new(MemoryBlobStore::new()),
            StubGenerator::ok(),
            AgentConfig::default(),
            "http://localhost:3000".into(),
        );
        let a = state.session(Partition::Demo).await.unwrap();
        let b = state.session(Partition::Demo).await.unwrap();
        let other = state.session(Partition::Teacher("t1".into())).await.unwrap();

        let st = a.add_student("Ava").await.unwrap();
        assert!(b.get_student_status(&st.id).await.is_some());
        assert!(other.get_student_status(&st.id).await.is_none());
        assert_eq!(state.poll_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn zero_interval_in_code_built_config_is_clamped() {
        let mut config = AgentConfig::default();
        config.service.poll_interval_ms = 0;
        let state = AppState::new(
            Arc::new(MemoryBlobStore::new()),
            StubGenerator::ok(),
            config,
            "http://localhost:3000".into(),
        );
        assert_eq!(state.poll_interval(), Duration::from_millis(1));
    }
}
