//! Storage seam shared by the filesystem tree and the key-value store

use crate::error::Result;
use crate::types::{Epic, People, Project, Story};
use async_trait::async_trait;

/// Read/write access to a tracker tree
///
/// `epic_ids` / `story_ids` give the children to walk, in walk order.
/// `stored_*` return the child list exactly as persisted (`None` when the
/// list itself is absent) and are what list reconciliation compares against.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Human-readable location, used in logs
    fn describe(&self) -> String;

    async fn list_projects(&self) -> Result<Vec<String>>;

    async fn get_people(&self) -> Result<Option<People>>;
    async fn put_people(&self, people: &People) -> Result<()>;

    async fn get_project(&self, project: &str) -> Result<Option<Project>>;
    async fn put_project(&self, project: &str, doc: &Project) -> Result<()>;

    async fn get_epic(&self, project: &str, epic: &str) -> Result<Option<Epic>>;
    async fn put_epic(&self, project: &str, epic: &str, doc: &Epic) -> Result<()>;

    async fn get_story(&self, project: &str, epic: &str, story: &str) -> Result<Option<Story>>;
    async fn put_story(&self, project: &str, epic: &str, story: &str, doc: &Story) -> Result<()>;

    async fn epic_ids(&self, project: &str) -> Result<Vec<String>>;
    async fn stored_epic_ids(&self, project: &str) -> Result<Option<Vec<String>>>;
    async fn set_epic_ids(&self, project: &str, ids: &[String]) -> Result<()>;

    async fn story_ids(&self, project: &str, epic: &str) -> Result<Vec<String>>;
    async fn stored_story_ids(&self, project: &str, epic: &str) -> Result<Option<Vec<String>>>;
    async fn set_story_ids(&self, project: &str, epic: &str, ids: &[String]) -> Result<()>;

    /// Record `project` in the store's project index, if it keeps one.
    /// Returns true when the index changed.
    async fn register_project(&self, _project: &str) -> Result<bool> {
        Ok(false)
    }

    async fn has_people(&self) -> Result<bool> {
        Ok(self.get_people().await?.is_some())
    }

    async fn has_project(&self, project: &str) -> Result<bool> {
        Ok(self.get_project(project).await?.is_some())
    }

    async fn has_epic(&self, project: &str, epic: &str) -> Result<bool> {
        Ok(self.get_epic(project, epic).await?.is_some())
    }

    async fn has_story(&self, project: &str, epic: &str, story: &str) -> Result<bool> {
        Ok(self.get_story(project, epic, story).await?.is_some())
    }
}
