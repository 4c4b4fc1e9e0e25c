//! Read-only export of one project subtree from the key-value store

use crate::error::{Result, TrackerError};
use crate::kv::KvRepository;
use crate::repository::Repository;
use crate::types::{Epic, NodePath, Project, Story};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySnapshot {
    pub id: String,
    pub document: Story,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicSnapshot {
    pub name: String,
    pub document: Epic,
    pub stories: Vec<StorySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub project: String,
    pub captured_at: DateTime<Utc>,
    pub document: Option<Project>,
    pub epics: Vec<EpicSnapshot>,
    /// Nodes left out because they could not be read
    pub omitted: Vec<String>,
}

impl Snapshot {
    pub fn story_count(&self) -> usize {
        self.epics.iter().map(|e| e.stories.len()).sum()
    }
}

fn omit(omitted: &mut Vec<String>, path: &NodePath, reason: impl std::fmt::Display) {
    let line = format!("{}: {}", path, reason);
    warn!("backup omitted {}", line);
    omitted.push(line);
}

/// Walk `project` through reads only
///
/// A node that cannot be read is recorded in `omitted` and left out; the
/// walk always runs to the end.
pub async fn capture(kv: &KvRepository, project: &str, epics: Option<&[String]>) -> Snapshot {
    let mut omitted = Vec::new();
    let project_path = NodePath::project(project);

    let document = match kv.get_project(project).await {
        Ok(Some(doc)) => Some(doc),
        Ok(None) => {
            omit(&mut omitted, &project_path, "not found");
            None
        }
        Err(e) => {
            omit(&mut omitted, &project_path, e);
            None
        }
    };

    let names = match epics {
        Some(selected) => selected.to_vec(),
        None => match kv.epic_ids(project).await {
            Ok(ids) => ids,
            Err(e) => {
                omit(&mut omitted, &project_path, format!("epic discovery failed: {}", e));
                Vec::new()
            }
        },
    };

    let mut captured = Vec::new();
    for name in names {
        let path = NodePath::epic(project, &name);
        let document = match kv.get_epic(project, &name).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                omit(&mut omitted, &path, "not found");
                continue;
            }
            Err(e) => {
                omit(&mut omitted, &path, e);
                continue;
            }
        };

        let story_ids = match kv.story_ids(project, &name).await {
            Ok(ids) => ids,
            Err(e) => {
                omit(&mut omitted, &path, format!("story discovery failed: {}", e));
                Vec::new()
            }
        };

        let mut stories = Vec::new();
        for id in story_ids {
            let story_path = NodePath::story(project, &name, &id);
            match kv.get_story(project, &name, &id).await {
                Ok(Some(document)) => stories.push(StorySnapshot { id, document }),
                Ok(None) => omit(&mut omitted, &story_path, "not found"),
                Err(e) => omit(&mut omitted, &story_path, e),
            }
        }

        captured.push(EpicSnapshot {
            name,
            document,
            stories,
        });
    }

    let snapshot = Snapshot {
        project: project.to_string(),
        captured_at: Utc::now(),
        document,
        epics: captured,
        omitted,
    };
    info!(
        project,
        epics = snapshot.epics.len(),
        stories = snapshot.story_count(),
        omitted = snapshot.omitted.len(),
        "captured snapshot"
    );
    snapshot
}

/// Write `snapshot` as `<dir>/<project>-<YYYYMMDD-HHMMSS>.json`
pub fn write_snapshot(dir: &Path, snapshot: &Snapshot) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| TrackerError::io(dir, e))?;
    let name = format!(
        "{}-{}.json",
        snapshot.project,
        snapshot.captured_at.format("%Y%m%d-%H%M%S")
    );
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(snapshot)
        .map_err(|e| TrackerError::json(path.display().to_string(), e))?;
    fs::write(&path, body + "\n").map_err(|e| TrackerError::io(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn seeded() -> KvRepository {
        let kv = KvRepository::new(Arc::new(MemoryBackend::new()));
        kv.put_project("acme", &Project::new(vec!["onboarding".into(), "ghost".into()]))
            .await
            .unwrap();
        kv.put_epic("acme", "onboarding", &Epic::new(vec!["S1".into(), "S2".into()]))
            .await
            .unwrap();
        kv.put_story("acme", "onboarding", "S1", &Story::default())
            .await
            .unwrap();
        kv
    }

    #[tokio::test]
    async fn test_capture_omits_unreadable_nodes() {
        let kv = seeded().await;
        let snapshot = capture(&kv, "acme", None).await;

        assert!(snapshot.document.is_some());
        assert_eq!(snapshot.epics.len(), 1);
        assert_eq!(snapshot.epics[0].stories.len(), 1);
        assert_eq!(
            snapshot.omitted,
            vec![
                "acme/onboarding/S2: not found".to_string(),
                "acme/ghost: not found".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_capture_selected_epics() {
        let kv = seeded().await;
        let snapshot = capture(&kv, "acme", Some(&["onboarding".to_string()][..])).await;
        assert_eq!(snapshot.epics.len(), 1);
        assert_eq!(snapshot.omitted.len(), 1);
    }

    #[tokio::test]
    async fn test_write_snapshot_names_file_by_timestamp() {
        let kv = seeded().await;
        let mut snapshot = capture(&kv, "acme", None).await;
        snapshot.captured_at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir.path().join("backups"), &snapshot).unwrap();
        assert_eq!(path.file_name().unwrap(), "acme-20250304-050607.json");

        let read: Snapshot = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, snapshot);
    }
}
