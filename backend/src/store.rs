//! Persistence for workflow definitions.
//!
//! Definitions are written through on every registry mutation and loaded once at startup.
//! Executions are never persisted.

use async_trait::async_trait;
use guildflow_shared::Workflow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Every persisted workflow. Returns an empty list when nothing was persisted yet.
    async fn load_all(&self) -> StoreResult<Vec<Workflow>>;

    /// Insert or replace one workflow
    async fn save(&self, workflow: &Workflow) -> StoreResult<()>;

    async fn remove(&self, id: Uuid) -> StoreResult<()>;
}

/// Keeps every definition in a single pretty-printed JSON array.
///
/// Writes go to a `.tmp` sibling first and are renamed over the target.
pub struct JsonFileStore {
    path: PathBuf,
    workflows: Mutex<Option<HashMap<Uuid, Workflow>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workflows: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> StoreResult<HashMap<Uuid, Workflow>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(HashMap::new());
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let entries: Vec<serde_json::Value> = serde_json::from_str(&contents)?;
        let mut workflows = HashMap::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<Workflow>(entry) {
                Ok(workflow) => {
                    workflows.insert(workflow.id, workflow);
                }
                Err(e) => warn!("Skipping unreadable workflow in {}: {}", self.path.display(), e),
            }
        }
        Ok(workflows)
    }

    async fn write_file(&self, workflows: &HashMap<Uuid, Workflow>) -> StoreResult<()> {
        let mut ordered: Vec<&Workflow> = workflows.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let json = serde_json::to_string_pretty(&ordered)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the cached contents and rewrite the file.
    ///
    /// The cache only takes the new contents once the write succeeded.
    async fn mutate<F>(&self, change: F) -> StoreResult<()>
    where
        F: FnOnce(&mut HashMap<Uuid, Workflow>),
    {
        let mut cached = self.workflows.lock().await;
        let mut workflows = match cached.as_ref() {
            Some(workflows) => workflows.clone(),
            None => self.read_file().await?,
        };

        change(&mut workflows);
        self.write_file(&workflows).await?;
        *cached = Some(workflows);
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn load_all(&self) -> StoreResult<Vec<Workflow>> {
        let workflows = self.read_file().await?;
        info!("Loaded {} workflows from {}", workflows.len(), self.path.display());

        let loaded = workflows.values().cloned().collect();
        *self.workflows.lock().await = Some(workflows);
        Ok(loaded)
    }

    async fn save(&self, workflow: &Workflow) -> StoreResult<()> {
        let workflow = workflow.clone();
        self.mutate(move |workflows| {
            workflows.insert(workflow.id, workflow);
        })
        .await
    }

    async fn remove(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(move |workflows| {
            workflows.remove(&id);
        })
        .await
    }
}

/// Store kept in memory; survives engine restarts within one process
#[derive(Default)]
pub struct MemoryStore {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_all(&self) -> StoreResult<Vec<Workflow>> {
        Ok(self.workflows.lock().await.values().cloned().collect())
    }

    async fn save(&self, workflow: &Workflow) -> StoreResult<()> {
        self.workflows
            .lock()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> StoreResult<()> {
        self.workflows.lock().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildflow_shared::{Action, Trigger, TriggerType, WorkflowDefinition};

    fn workflow(name: &str) -> Workflow {
        Workflow::from_definition(
            WorkflowDefinition::new(name, 1, 7, Trigger::new(TriggerType::MemberJoined))
                .with_action(Action::send_message("greet", "welcome", "Hello {{username}}")),
        )
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("workflows.json"));

        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_remove_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workflows.json");
        let first = workflow("First");
        let second = workflow("Second");

        let store = JsonFileStore::new(&path);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        store.remove(first.id).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let reopened = JsonFileStore::new(&path);
        let loaded = reopened.load_all().await.unwrap();
        assert_eq!(loaded, vec![second]);
    }

    #[tokio::test]
    async fn test_unreadable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        let good = workflow("Good");
        let contents = serde_json::to_string(&serde_json::json!([good, { "name": "broken" }]))
            .unwrap();
        std::fs::write(&path, contents).unwrap();

        let loaded = JsonFileStore::new(&path).load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            JsonFileStore::new(&path).load_all().await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_is_not_persisted_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        let first = workflow("First");
        let rejected = workflow("Rejected");
        let third = workflow("Third");

        let store = JsonFileStore::new(&path);
        store.save(&first).await.unwrap();

        // a directory in place of the temp file makes the next write fail
        let tmp_path = path.with_extension("tmp");
        std::fs::create_dir(&tmp_path).unwrap();
        assert!(matches!(store.save(&rejected).await, Err(StoreError::Io(_))));
        std::fs::remove_dir(&tmp_path).unwrap();

        store.save(&third).await.unwrap();

        let mut names: Vec<String> = JsonFileStore::new(&path)
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|workflow| workflow.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["First".to_string(), "Third".to_string()]);
    }
}
