//! Deleting one project's keys from the key-value store
//!
//! Destructive runs need an explicit confirmation; a dry run only reports
//! the plan. Discovery reads the project document, and falls back to the
//! epics list key when the document is gone, so half-deleted projects can
//! still be cleaned up.

use crate::error::{Result, TrackerError};
use crate::keys;
use crate::kv::KvRepository;
use crate::lock::Lock;
use crate::migrate::merge_ids;
use crate::repository::Repository;
use crate::types::validate_segment;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOptions {
    pub dry_run: bool,
    pub confirm: bool,
}

impl CleanupOptions {
    /// Refuse a destructive run that was not confirmed
    pub fn check(&self) -> Result<()> {
        if self.dry_run || self.confirm {
            Ok(())
        } else {
            Err(TrackerError::SafetyGate)
        }
    }
}

/// Everything a cleanup of one project would touch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupPlan {
    pub project: String,
    /// Keys in deletion order
    pub keys: Vec<String>,
    pub epics: Vec<String>,
    pub stories: usize,
    /// Project-scoped keys found by scanning that no list references
    pub orphans: usize,
    /// The project document was missing and epics came from the list key
    pub used_fallback: bool,
    pub index_contains_project: bool,
    /// Reads that failed during discovery; the plan covers what was readable
    pub unreadable: Vec<String>,
}

impl CleanupPlan {
    fn note_unreadable(&mut self, what: &str, error: impl std::fmt::Display) {
        let line = format!("{}: read failed: {}", what, error);
        warn!("{}", line);
        self.unreadable.push(line);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub plan: CleanupPlan,
    pub deleted: usize,
    /// Planned keys that were already absent
    pub missing: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub index_updated: bool,
}

impl CleanupReport {
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub struct CleanupEngine<'a> {
    kv: &'a KvRepository,
    options: CleanupOptions,
    lock_dir: Option<PathBuf>,
}

impl<'a> CleanupEngine<'a> {
    pub fn new(kv: &'a KvRepository, options: CleanupOptions) -> Self {
        Self {
            kv,
            options,
            lock_dir: None,
        }
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Enumerate every key belonging to `project`
    ///
    /// A failed read narrows the plan instead of aborting it: an unreadable
    /// stories list falls back to the epic document, and the namespace sweep
    /// still picks up keys the lists could not name.
    pub async fn discover(&self, project: &str) -> Result<CleanupPlan> {
        validate_segment(project)?;

        let mut plan = CleanupPlan {
            project: project.to_string(),
            keys: vec![
                keys::project_document_key(project),
                keys::project_epics_list_key(project),
            ],
            ..Default::default()
        };

        let document = match self.kv.get_project(project).await {
            Ok(doc) => doc,
            Err(TrackerError::Json { .. }) => {
                warn!(project, "project document is corrupt, using epics list");
                None
            }
            Err(e) => {
                plan.note_unreadable(&keys::project_document_key(project), e);
                None
            }
        };
        let listed_epics = self
            .read_list(&keys::project_epics_list_key(project), &mut plan)
            .await;

        let epics = match &document {
            Some(doc) => merge_ids(&doc.epic_ids, &listed_epics),
            None => {
                plan.used_fallback = true;
                listed_epics
            }
        };

        for epic in &epics {
            let listed_stories = self
                .read_list(&keys::epic_stories_list_key(project, epic), &mut plan)
                .await;
            let documented = match self.kv.get_epic(project, epic).await {
                Ok(doc) => doc.map(|d| d.story_ids).unwrap_or_default(),
                Err(TrackerError::Json { .. }) => {
                    warn!(project, epic = %epic, "epic document is corrupt, ignoring");
                    Vec::new()
                }
                Err(e) => {
                    plan.note_unreadable(&keys::epic_document_key(project, epic), e);
                    Vec::new()
                }
            };
            let stories = merge_ids(&listed_stories, &documented);

            plan.keys.push(keys::epic_document_key(project, epic));
            plan.keys.push(keys::epic_stories_list_key(project, epic));
            for story in &stories {
                plan.keys.push(keys::story_document_key(project, epic, story));
            }
            plan.stories += stories.len();
        }
        plan.epics = epics;

        let pattern = keys::project_namespace_pattern(project);
        match self.kv.keys(&pattern).await {
            Ok(found) => {
                for key in found {
                    let belongs =
                        keys::classify(&key).is_some_and(|kind| kind.project() == Some(project));
                    if belongs && !plan.keys.contains(&key) {
                        plan.keys.push(key);
                        plan.orphans += 1;
                    }
                }
            }
            Err(e) => plan.note_unreadable(&pattern, e),
        }

        match self.kv.projects_index().await {
            Ok(index) => {
                plan.index_contains_project =
                    index.is_some_and(|index| index.iter().any(|p| p == project));
            }
            Err(e) => plan.note_unreadable(&keys::projects_index_key(), e),
        }

        debug!(
            project,
            keys = plan.keys.len(),
            fallback = plan.used_fallback,
            unreadable = plan.unreadable.len(),
            "cleanup plan"
        );
        Ok(plan)
    }

    /// A list key as IDs; corrupt lists are ignored, failed reads noted
    async fn read_list(&self, key: &str, plan: &mut CleanupPlan) -> Vec<String> {
        match self.kv.get_list(key).await {
            Ok(list) => list.unwrap_or_default(),
            Err(TrackerError::Json { .. }) => {
                warn!(key, "list key is not a JSON array, ignoring");
                Vec::new()
            }
            Err(e) => {
                plan.note_unreadable(key, e);
                Vec::new()
            }
        }
    }

    /// Check the safety gate, discover, then delete (or only plan)
    pub async fn run(&self, project: &str) -> Result<CleanupReport> {
        self.options.check()?;
        validate_segment(project)?;

        let _lock = match (&self.lock_dir, self.options.dry_run) {
            (Some(dir), false) => Some(
                Lock::acquire_named(dir, project)
                    .await
                    .map_err(|e| TrackerError::Locked(format!("{:#}", e)))?,
            ),
            _ => None,
        };

        let plan = self.discover(project).await?;
        let mut report = CleanupReport {
            dry_run: self.options.dry_run,
            errors: plan.unreadable.clone(),
            ..Default::default()
        };

        if self.options.dry_run {
            info!(project, keys = plan.keys.len(), "[DRY RUN] cleanup planned");
            report.plan = plan;
            return Ok(report);
        }

        for key in &plan.keys {
            match self.kv.delete_key(key).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.missing += 1,
                Err(e) => {
                    let line = format!("{}: delete failed: {}", key, e);
                    warn!("{}", line);
                    report.failed += 1;
                    report.errors.push(line);
                }
            }
        }

        match self.remove_from_index(project).await {
            Ok(updated) => report.index_updated = updated,
            Err(e) => {
                let line = format!("{}: index update failed: {}", keys::projects_index_key(), e);
                warn!("{}", line);
                report.errors.push(line);
            }
        }

        info!(
            project,
            deleted = report.deleted,
            missing = report.missing,
            failed = report.failed,
            "cleanup done"
        );
        report.plan = plan;
        Ok(report)
    }

    /// Drop `project` from the index, keeping the key and the order of the
    /// remaining names
    async fn remove_from_index(&self, project: &str) -> Result<bool> {
        let Some(index) = self.kv.projects_index().await? else {
            return Ok(false);
        };
        if !index.iter().any(|p| p == project) {
            return Ok(false);
        }
        let remaining: Vec<String> = index.into_iter().filter(|p| p != project).collect();
        self.kv.set_projects_index(&remaining).await?;
        Ok(true)
    }
}

