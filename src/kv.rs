//! Tracker tree stored in a key-value backend
//!
//! Documents are JSON strings under the keys from [`crate::keys`]. List keys
//! and the projects index hold JSON arrays of names, each written with a
//! single `SET`.

use crate::backend::KvBackend;
use crate::command::{Command, SetOptions};
use crate::error::{Result, TrackerError};
use crate::keys::{self, KeyKind};
use crate::repository::Repository;
use crate::types::{validate_segment, Epic, People, Project, Story};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct KvRepository {
    backend: Arc<dyn KvBackend>,
}

impl KvRepository {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    async fn run(&self, command: Command) -> Result<Value> {
        Ok(self.backend.execute(&command).await?)
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self.run(Command::Get { key: key.to_string() }).await?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    pub async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        self.run(Command::Set {
            key: key.to_string(),
            value,
            options: SetOptions::default(),
        })
        .await?;
        Ok(())
    }

    /// Delete one key; true when it existed
    pub async fn delete_key(&self, key: &str) -> Result<bool> {
        let removed = self
            .run(Command::Del {
                keys: vec![key.to_string()],
            })
            .await?;
        Ok(removed.as_i64().unwrap_or(0) > 0)
    }

    pub async fn key_exists(&self, key: &str) -> Result<bool> {
        let count = self
            .run(Command::Exists {
                keys: vec![key.to_string()],
            })
            .await?;
        Ok(count.as_i64().unwrap_or(0) > 0)
    }

    /// Keys matching a glob pattern, sorted
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let value = self
            .run(Command::Keys {
                pattern: pattern.to_string(),
            })
            .await?;
        let mut keys: Vec<String> = serde_json::from_value(value)
            .map_err(|e| TrackerError::json(format!("KEYS {}", pattern), e))?;
        keys.sort();
        Ok(keys)
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| TrackerError::json(key, e)),
        }
    }

    async fn put_json<T: Serialize + ?Sized + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_string(value).map_err(|e| TrackerError::json(key, e))?;
        self.set_raw(key, body).await
    }

    /// Read a list key
    pub async fn get_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        self.get_json(key).await
    }

    pub async fn set_list(&self, key: &str, ids: &[String]) -> Result<()> {
        self.put_json(key, ids).await
    }

    pub async fn projects_index(&self) -> Result<Option<Vec<String>>> {
        self.get_list(&keys::projects_index_key()).await
    }

    pub async fn set_projects_index(&self, projects: &[String]) -> Result<()> {
        self.set_list(&keys::projects_index_key(), projects).await
    }
}

#[async_trait]
impl Repository for KvRepository {
    fn describe(&self) -> String {
        format!("kv:{}", self.backend.name())
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        if let Some(index) = self.projects_index().await? {
            return Ok(index);
        }

        let mut projects: Vec<String> = self
            .keys(&keys::all_projects_pattern())
            .await?
            .iter()
            .filter_map(|key| match keys::classify(key) {
                Some(KeyKind::ProjectDocument { project }) => Some(project),
                _ => None,
            })
            .collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    async fn get_people(&self) -> Result<Option<People>> {
        self.get_json(&keys::global_people_key()).await
    }

    async fn put_people(&self, people: &People) -> Result<()> {
        self.put_json(&keys::global_people_key(), people).await
    }

    async fn get_project(&self, project: &str) -> Result<Option<Project>> {
        validate_segment(project)?;
        self.get_json(&keys::project_document_key(project)).await
    }

    async fn put_project(&self, project: &str, doc: &Project) -> Result<()> {
        validate_segment(project)?;
        self.put_json(&keys::project_document_key(project), doc).await
    }

    async fn get_epic(&self, project: &str, epic: &str) -> Result<Option<Epic>> {
        validate_segment(epic)?;
        self.get_json(&keys::epic_document_key(project, epic)).await
    }

    async fn put_epic(&self, project: &str, epic: &str, doc: &Epic) -> Result<()> {
        validate_segment(epic)?;
        self.put_json(&keys::epic_document_key(project, epic), doc).await
    }

    async fn get_story(&self, project: &str, epic: &str, story: &str) -> Result<Option<Story>> {
        validate_segment(story)?;
        self.get_json(&keys::story_document_key(project, epic, story))
            .await
    }

    async fn put_story(&self, project: &str, epic: &str, story: &str, doc: &Story) -> Result<()> {
        validate_segment(story)?;
        self.put_json(&keys::story_document_key(project, epic, story), doc)
            .await
    }

    async fn epic_ids(&self, project: &str) -> Result<Vec<String>> {
        if let Some(ids) = self.stored_epic_ids(project).await? {
            return Ok(ids);
        }
        Ok(self
            .get_project(project)
            .await?
            .map(|p| p.epic_ids)
            .unwrap_or_default())
    }

    async fn stored_epic_ids(&self, project: &str) -> Result<Option<Vec<String>>> {
        self.get_list(&keys::project_epics_list_key(project)).await
    }

    async fn set_epic_ids(&self, project: &str, ids: &[String]) -> Result<()> {
        self.set_list(&keys::project_epics_list_key(project), ids).await
    }

    async fn story_ids(&self, project: &str, epic: &str) -> Result<Vec<String>> {
        if let Some(ids) = self.stored_story_ids(project, epic).await? {
            return Ok(ids);
        }
        Ok(self
            .get_epic(project, epic)
            .await?
            .map(|e| e.story_ids)
            .unwrap_or_default())
    }

    async fn stored_story_ids(&self, project: &str, epic: &str) -> Result<Option<Vec<String>>> {
        self.get_list(&keys::epic_stories_list_key(project, epic)).await
    }

    async fn set_story_ids(&self, project: &str, epic: &str, ids: &[String]) -> Result<()> {
        self.set_list(&keys::epic_stories_list_key(project, epic), ids)
            .await
    }

    async fn register_project(&self, project: &str) -> Result<bool> {
        let mut index = self.projects_index().await?.unwrap_or_default();
        if index.iter().any(|p| p == project) {
            return Ok(false);
        }
        index.push(project.to_string());
        self.set_projects_index(&index).await?;
        Ok(true)
    }

    async fn has_people(&self) -> Result<bool> {
        self.key_exists(&keys::global_people_key()).await
    }

    async fn has_project(&self, project: &str) -> Result<bool> {
        self.key_exists(&keys::project_document_key(project)).await
    }

    async fn has_epic(&self, project: &str, epic: &str) -> Result<bool> {
        self.key_exists(&keys::epic_document_key(project, epic))
            .await
    }

    async fn has_story(&self, project: &str, epic: &str, story: &str) -> Result<bool> {
        self.key_exists(&keys::story_document_key(project, epic, story))
            .await
    }
}
