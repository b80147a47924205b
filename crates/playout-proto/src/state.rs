use crate::protocol::EngineSnapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PersistentState {
    pub last_control_channel: Option<String>,
}

/// Published engine snapshot shared between the core loop (single writer)
/// and the observer surfaces (HTTP API, control-surface clients).
pub struct StateManager {
    state: Arc<RwLock<EngineSnapshot>>,
    state_file: PathBuf,
    persistent: RwLock<PersistentState>,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&state_file);

        Self {
            state: Arc::new(RwLock::new(EngineSnapshot {
                rev: 1,
                ..Default::default()
            })),
            state_file,
            persistent: RwLock::new(persistent),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<EngineSnapshot>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> EngineSnapshot {
        self.state.read().await.clone()
    }

    /// Control channel remembered from the previous run.
    pub async fn last_control_channel(&self) -> Option<String> {
        self.persistent.read().await.last_control_channel.clone()
    }

    /// Replace the published snapshot.  Returns `false` when nothing but the
    /// revision would have changed, in which case the revision is kept.
    pub async fn publish(&self, mut snapshot: EngineSnapshot) -> bool {
        let mut state = self.state.write().await;
        snapshot.rev = state.rev;
        if *state == snapshot {
            return false;
        }
        snapshot.rev = state.rev + 1;
        *state = snapshot;
        true
    }

    /// Persist a control channel the operator picked.  Auto-derived
    /// selections never come through here.
    pub async fn remember_control_channel(&self, id: &str) -> anyhow::Result<()> {
        let persistent = {
            let mut guard = self.persistent.write().await;
            if guard.last_control_channel.as_deref() == Some(id) {
                return Ok(());
            }
            guard.last_control_channel = Some(id.to_string());
            guard.clone()
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return persistent;
            }
        }
        PersistentState::default()
    }
}
