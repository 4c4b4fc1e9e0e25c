use crate::error::{Result, TrackerError};
use crate::repository::Repository;
use crate::types::{validate_segment, Epic, People, Project, Story};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Tracker tree stored as JSON files under a data directory
///
/// ```text
/// <root>/people.json
/// <root>/projects/<project>/project.json
/// <root>/projects/<project>/epics/<epic>/epic.json
/// <root>/projects/<project>/epics/<epic>/stories/<story>.json
/// ```
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    /// Open the tree rooted at `root` (created lazily on first write)
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn people_path(&self) -> PathBuf {
        self.root.join("people.json")
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf> {
        validate_segment(project)?;
        Ok(self.projects_dir().join(project))
    }

    fn project_path(&self, project: &str) -> Result<PathBuf> {
        Ok(self.project_dir(project)?.join("project.json"))
    }

    fn epics_dir(&self, project: &str) -> Result<PathBuf> {
        Ok(self.project_dir(project)?.join("epics"))
    }

    fn epic_dir(&self, project: &str, epic: &str) -> Result<PathBuf> {
        validate_segment(epic)?;
        Ok(self.epics_dir(project)?.join(epic))
    }

    fn epic_path(&self, project: &str, epic: &str) -> Result<PathBuf> {
        Ok(self.epic_dir(project, epic)?.join("epic.json"))
    }

    fn stories_dir(&self, project: &str, epic: &str) -> Result<PathBuf> {
        Ok(self.epic_dir(project, epic)?.join("stories"))
    }

    fn story_path(&self, project: &str, epic: &str, story: &str) -> Result<PathBuf> {
        validate_segment(story)?;
        Ok(self
            .stories_dir(project, epic)?
            .join(format!("{}.json", story)))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TrackerError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| TrackerError::json(path.display().to_string(), e))
}

/// Write pretty JSON through a temp file in the same directory, then rename
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| TrackerError::io(dir, e))?;

    let mut body = serde_json::to_string_pretty(value)
        .map_err(|e| TrackerError::json(path.display().to_string(), e))?;
    body.push('\n');

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| TrackerError::io(dir, e))?;
    tmp.write_all(body.as_bytes())
        .map_err(|e| TrackerError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| TrackerError::io(path, e.error))?;
    Ok(())
}

/// Names of entries in `dir` accepted by `keep`, sorted
fn list_entries(dir: &Path, keep: impl Fn(&fs::DirEntry) -> Option<String>) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TrackerError::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TrackerError::io(dir, e))?;
        if let Some(name) = keep(&entry) {
            if validate_segment(&name).is_ok() {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    list_entries(dir, |entry| {
        entry
            .file_type()
            .ok()
            .filter(|t| t.is_dir())
            .map(|_| entry.file_name().to_string_lossy().into_owned())
    })
}

fn json_stems(dir: &Path) -> Result<Vec<String>> {
    list_entries(dir, |entry| {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_file = entry.file_type().ok().is_some_and(|t| t.is_file());
        name.strip_suffix(".json")
            .filter(|_| is_file)
            .map(str::to_string)
    })
}

/// Listed IDs that are present first, then the remaining present IDs
fn listed_then_present(listed: &[String], present: Vec<String>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for id in listed.iter().filter(|id| present.contains(id)) {
        if !ordered.contains(id) {
            ordered.push(id.clone());
        }
    }
    for id in present {
        if !ordered.contains(&id) {
            ordered.push(id);
        }
    }
    ordered
}

#[async_trait]
impl Repository for LocalRepository {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        subdirectories(&self.projects_dir())
    }

    async fn get_people(&self) -> Result<Option<People>> {
        read_json(&self.people_path())
    }

    async fn put_people(&self, people: &People) -> Result<()> {
        write_json(&self.people_path(), people)
    }

    async fn get_project(&self, project: &str) -> Result<Option<Project>> {
        read_json(&self.project_path(project)?)
    }

    async fn put_project(&self, project: &str, doc: &Project) -> Result<()> {
        write_json(&self.project_path(project)?, doc)
    }

    async fn get_epic(&self, project: &str, epic: &str) -> Result<Option<Epic>> {
        read_json(&self.epic_path(project, epic)?)
    }

    async fn put_epic(&self, project: &str, epic: &str, doc: &Epic) -> Result<()> {
        write_json(&self.epic_path(project, epic)?, doc)
    }

    async fn get_story(&self, project: &str, epic: &str, story: &str) -> Result<Option<Story>> {
        read_json(&self.story_path(project, epic, story)?)
    }

    async fn put_story(&self, project: &str, epic: &str, story: &str, doc: &Story) -> Result<()> {
        write_json(&self.story_path(project, epic, story)?, doc)
    }

    async fn epic_ids(&self, project: &str) -> Result<Vec<String>> {
        let listed = self
            .get_project(project)
            .await?
            .map(|p| p.epic_ids)
            .unwrap_or_default();
        let present = subdirectories(&self.epics_dir(project)?)?;
        Ok(listed_then_present(&listed, present))
    }

    async fn stored_epic_ids(&self, project: &str) -> Result<Option<Vec<String>>> {
        Ok(self.get_project(project).await?.map(|p| p.epic_ids))
    }

    async fn set_epic_ids(&self, project: &str, ids: &[String]) -> Result<()> {
        let mut doc = self.get_project(project).await?.unwrap_or_default();
        doc.epic_ids = ids.to_vec();
        self.put_project(project, &doc).await
    }

    async fn story_ids(&self, project: &str, epic: &str) -> Result<Vec<String>> {
        let listed = self
            .get_epic(project, epic)
            .await?
            .map(|e| e.story_ids)
            .unwrap_or_default();
        let present = json_stems(&self.stories_dir(project, epic)?)?;
        Ok(listed_then_present(&listed, present))
    }

    async fn stored_story_ids(&self, project: &str, epic: &str) -> Result<Option<Vec<String>>> {
        Ok(self.get_epic(project, epic).await?.map(|e| e.story_ids))
    }

    async fn set_story_ids(&self, project: &str, epic: &str, ids: &[String]) -> Result<()> {
        let mut doc = self.get_epic(project, epic).await?.unwrap_or_default();
        doc.story_ids = ids.to_vec();
        self.put_epic(project, epic, &doc).await
    }

    async fn has_people(&self) -> Result<bool> {
        Ok(self.people_path().is_file())
    }

    async fn has_project(&self, project: &str) -> Result<bool> {
        Ok(self.project_path(project)?.is_file())
    }

    async fn has_epic(&self, project: &str, epic: &str) -> Result<bool> {
        Ok(self.epic_path(project, epic)?.is_file())
    }

    async fn has_story(&self, project: &str, epic: &str, story: &str) -> Result<bool> {
        Ok(self.story_path(project, epic, story)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_write_then_read_documents() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(dir.path());

        let mut project = Project::new(strings(&["e1"]));
        project.extra.insert("name".to_string(), json!("Acme"));
        repo.put_project("acme", &project).await.unwrap();
        repo.put_people(&json!([{"id": 1}])).await.unwrap();

        assert_eq!(repo.get_project("acme").await.unwrap(), Some(project));
        assert_eq!(repo.get_people().await.unwrap(), Some(json!([{"id": 1}])));
        assert!(repo.get_epic("acme", "e1").await.unwrap().is_none());
        assert!(dir.path().join("projects/acme/project.json").is_file());
    }

    #[tokio::test]
    async fn test_child_discovery_prefers_listed_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(dir.path());

        repo.put_project("acme", &Project::new(strings(&["zeta", "ghost", "alpha"])))
            .await
            .unwrap();
        for epic in ["alpha", "beta", "zeta"] {
            repo.put_epic("acme", epic, &Epic::default()).await.unwrap();
        }

        assert_eq!(
            repo.epic_ids("acme").await.unwrap(),
            strings(&["zeta", "alpha", "beta"])
        );
    }

    #[tokio::test]
    async fn test_story_discovery_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(dir.path());

        repo.put_epic("acme", "e1", &Epic::new(strings(&["S2"]))).await.unwrap();
        for id in ["S1", "S2"] {
            repo.put_story("acme", "e1", id, &Story::default()).await.unwrap();
        }
        fs::write(dir.path().join("projects/acme/epics/e1/stories/notes.txt"), "x").unwrap();

        assert_eq!(repo.story_ids("acme", "e1").await.unwrap(), strings(&["S2", "S1"]));
    }

    #[tokio::test]
    async fn test_set_epic_ids_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(dir.path());

        let mut project = Project::new(vec![]);
        project.extra.insert("title".to_string(), json!("Acme"));
        repo.put_project("acme", &project).await.unwrap();
        repo.set_epic_ids("acme", &strings(&["a", "b"])).await.unwrap();

        let stored = repo.get_project("acme").await.unwrap().unwrap();
        assert_eq!(stored.epic_ids, strings(&["a", "b"]));
        assert_eq!(stored.extra["title"], "Acme");
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(dir.path());
        assert!(matches!(
            repo.get_project("../outside").await,
            Err(TrackerError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(dir.path());
        fs::write(dir.path().join("people.json"), "{not json").unwrap();
        assert!(matches!(repo.get_people().await, Err(TrackerError::Json { .. })));
    }
}
