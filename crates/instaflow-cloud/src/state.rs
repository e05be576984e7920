//! Persisted record of tracked resources
//!
//! Everything lives under `<root>/.instaflow/`:
//!
//! - `state.json`: one entry per declared resource, keyed `kind:name`,
//!   holding its StableID and the last reconciled model
//! - `state.json.backup`: the previous `state.json`
//! - `lock.json`: present while a command mutates the state

use crate::error::{CloudError, Result};
use crate::id::StableId;
use crate::reconciler::Tracked;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".instaflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Age after which a lock left by a crashed run may be taken over.
fn stale_lock_age() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Keyed by [`resource_key`]
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `resource.key()`.
    pub fn set_resource(&mut self, resource: ResourceState) {
        self.updated_at = Utc::now();
        self.resources.insert(resource.key(), resource);
    }

    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(key)?;
        self.updated_at = Utc::now();
        Some(removed)
    }

    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<&ResourceState> {
        self.get_resource(&resource_key(kind, name))
    }
}

pub fn resource_key(kind: &str, name: &str) -> String {
    format!("{kind}:{name}")
}

/// One tracked resource with its model stored as plain JSON, so the state
/// file does not depend on the concrete model types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: String,
    pub name: String,
    pub stable_id: StableId,
    pub model: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn from_tracked<M: Serialize>(
        kind: impl Into<String>,
        name: impl Into<String>,
        tracked: &Tracked<M>,
    ) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            kind: kind.into(),
            name: name.into(),
            stable_id: tracked.id.clone(),
            model: serde_json::to_value(&tracked.model)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite id and model after a read, keeping `created_at`.
    pub fn refresh<M: Serialize>(&mut self, tracked: &Tracked<M>) -> Result<()> {
        self.model = serde_json::to_value(&tracked.model)?;
        self.stable_id = tracked.id.clone();
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn to_tracked<M: DeserializeOwned>(&self) -> Result<Tracked<M>> {
        let model = M::deserialize(&self.model).map_err(|err| {
            CloudError::StateError(format!("unreadable model for {}: {err}", self.key()))
        })?;
        Ok(Tracked::new(self.stable_id.clone(), model))
    }

    pub fn key(&self) -> String {
        resource_key(&self.kind, &self.name)
    }
}

/// Reads and writes the state directory of one project root.
#[derive(Debug, Clone)]
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Load the state; a missing file is an empty state.
    pub async fn load(&self) -> Result<GlobalState> {
        let content = match fs::read_to_string(self.path(STATE_FILE)).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "No state file yet");
                return Ok(GlobalState::new());
            }
            Err(err) => return Err(err.into()),
        };

        let state: GlobalState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "state file version {} is newer than supported version {STATE_VERSION}",
                state.version
            )));
        }
        tracing::debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Write the state, moving the previous file to the backup slot.
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        self.create_dir().await?;
        let current = self.path(STATE_FILE);
        let staged = self.path("state.json.tmp");

        fs::write(&staged, serde_json::to_vec_pretty(state)?).await?;
        match fs::rename(&current, self.path(STATE_BACKUP)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::rename(&staged, &current).await?;

        tracing::debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Take the lock file, replacing it only when it has gone stale.
    ///
    /// The file is created with `create_new`, so of two concurrent runs
    /// exactly one gets the lock.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.create_dir().await?;
        let path = self.path(LOCK_FILE);

        let info = LockInfo {
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&info)?;

        if !create_lock(&path, &content).await? {
            if let Some(holder) = read_lock(&path).await? {
                let age = Utc::now().signed_duration_since(holder.acquired_at);
                if age < stale_lock_age() {
                    return Err(CloudError::LockError(format!(
                        "state is locked by {} (pid {}) since {}",
                        holder.host, holder.pid, holder.acquired_at
                    )));
                }
                tracing::warn!(host = %holder.host, pid = holder.pid, "Taking over stale state lock");
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
            if !create_lock(&path, &content).await? {
                return Err(CloudError::LockError(
                    "state lock was taken by another run".to_string(),
                ));
            }
        }

        tracing::debug!(pid = info.pid, "Acquired state lock");
        Ok(StateLock { path: Some(path) })
    }
}

/// Create the lock file unless one exists; `false` when it already does.
async fn create_lock(path: &Path, content: &[u8]) -> Result<bool> {
    let opened = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    match opened {
        Ok(mut file) => {
            file.write_all(content).await?;
            file.flush().await?;
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

async fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            CloudError::LockError(format!("unreadable lock file {}: {err}", path.display()))
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Held lock; removed on [`StateLock::release`] or, failing that, on drop.
#[derive(Debug)]
pub struct StateLock {
    path: Option<PathBuf>,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Released state lock"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct RuleModel {
        cluster_id: String,
        network: String,
    }

    fn tracked_rule() -> Tracked<RuleModel> {
        Tracked::new(
            "clusterA:10.0.0.0/24",
            RuleModel {
                cluster_id: "clusterA".to_string(),
                network: "10.0.0.0/24".to_string(),
            },
        )
    }

    fn state_with_rule() -> GlobalState {
        let mut state = GlobalState::new();
        state.set_resource(
            ResourceState::from_tracked("firewall_rule", "office", &tracked_rule()).unwrap(),
        );
        state
    }

    #[tokio::test]
    async fn test_missing_state_is_empty() {
        let root = tempdir().unwrap();
        let state = StateManager::new(root.path()).load().await.unwrap();
        assert!(state.resources.is_empty());
        assert!(!root.path().join(STATE_DIR).exists());
    }

    #[tokio::test]
    async fn test_save_then_load_restores_tracked_models() {
        let root = tempdir().unwrap();
        let manager = StateManager::new(root.path());
        manager.save(&state_with_rule()).await.unwrap();

        let loaded = manager.load().await.unwrap();
        let resource = loaded.get("firewall_rule", "office").unwrap();
        assert_eq!(resource.stable_id.as_str(), "clusterA:10.0.0.0/24");
        assert_eq!(resource.to_tracked::<RuleModel>().unwrap(), tracked_rule());
    }

    #[tokio::test]
    async fn test_second_save_keeps_previous_as_backup() {
        let root = tempdir().unwrap();
        let manager = StateManager::new(root.path());

        manager.save(&state_with_rule()).await.unwrap();
        manager.save(&GlobalState::new()).await.unwrap();

        let backup = std::fs::read_to_string(root.path().join(STATE_DIR).join(STATE_BACKUP)).unwrap();
        assert!(backup.contains("clusterA:10.0.0.0/24"));
        assert!(manager.load().await.unwrap().resources.is_empty());
    }

    #[tokio::test]
    async fn test_newer_state_version_is_rejected() {
        let root = tempdir().unwrap();
        let manager = StateManager::new(root.path());
        let mut state = GlobalState::new();
        state.version = STATE_VERSION + 1;
        manager.save(&state).await.unwrap();

        assert!(matches!(
            manager.load().await,
            Err(CloudError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let root = tempdir().unwrap();
        let manager = StateManager::new(root.path());

        let lock = manager.acquire_lock().await.unwrap();
        assert!(matches!(
            manager.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));

        lock.release().await.unwrap();
        manager.acquire_lock().await.unwrap().release().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_acquire_grants_one_lock() {
        let root = tempdir().unwrap();
        let first = StateManager::new(root.path());
        let second = first.clone();

        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.acquire_lock().await }),
            tokio::spawn(async move { second.acquire_lock().await }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(
            [&a, &b].iter().filter(|r| r.is_ok()).count(),
            1,
            "{a:?} / {b:?}"
        );
        assert!(
            [&a, &b]
                .iter()
                .any(|r| matches!(r, Err(CloudError::LockError(_))))
        );
    }

    #[tokio::test]
    async fn test_dropped_lock_is_removed() {
        let root = tempdir().unwrap();
        let manager = StateManager::new(root.path());

        drop(manager.acquire_lock().await.unwrap());
        assert!(!root.path().join(STATE_DIR).join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let root = tempdir().unwrap();
        let manager = StateManager::new(root.path());
        let stale = LockInfo {
            host: "crashed".to_string(),
            pid: 1,
            acquired_at: Utc::now() - Duration::hours(2),
        };
        std::fs::create_dir_all(root.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            root.path().join(STATE_DIR).join(LOCK_FILE),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        manager.acquire_lock().await.unwrap().release().await.unwrap();
    }

    #[test]
    fn test_unreadable_model_is_a_state_error() {
        let state = state_with_rule();
        let resource = state.get_resource("firewall_rule:office").unwrap();
        assert!(matches!(
            resource.to_tracked::<u32>(),
            Err(CloudError::StateError(_))
        ));
    }

    #[test]
    fn test_remove_resource() {
        let mut state = state_with_rule();
        assert!(state.remove_resource("firewall_rule:office").is_some());
        assert!(state.remove_resource("firewall_rule:office").is_none());
        assert!(state.get("firewall_rule", "office").is_none());
    }
}
