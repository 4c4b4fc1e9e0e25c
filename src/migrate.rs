//! Tree migration between two repositories
//!
//! Walks people, then each project, its epics and their stories, copying
//! every node from the source to the destination. Per node:
//!
//! - missing in the source: failed (a missing project stops its subtree)
//! - already in the destination without `force`: skipped, children still walked
//! - dry run: planned, a `[DRY RUN]` plan line is recorded
//! - otherwise written; a write error fails only that node
//!
//! Child ID lists are never reordered. [`merge_ids`] keeps the source order
//! and appends destination-only IDs, so repeated runs converge.

use crate::error::Result;
use crate::lock::Lock;
use crate::repository::Repository;
use crate::types::{NodeKind, NodePath};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which projects a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Project(String),
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub dry_run: bool,
    pub force: bool,
    pub scope: Scope,
    /// Restrict the epic walk to these names, in this order
    pub epics: Option<Vec<String>>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            scope: Scope::All,
            epics: None,
        }
    }
}

/// What happened to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeOutcome {
    Written,
    Skipped,
    Planned,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeCounts {
    pub written: usize,
    pub skipped: usize,
    pub planned: usize,
    pub failed: usize,
}

impl NodeCounts {
    pub fn record(&mut self, outcome: NodeOutcome) {
        match outcome {
            NodeOutcome::Written => self.written += 1,
            NodeOutcome::Skipped => self.skipped += 1,
            NodeOutcome::Planned => self.planned += 1,
            NodeOutcome::Failed => self.failed += 1,
        }
    }

    pub fn add(&mut self, other: &NodeCounts) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.planned += other.planned;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.written + self.skipped + self.planned + self.failed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub name: String,
    pub outcome: NodeOutcome,
    pub epics: NodeCounts,
    pub stories: NodeCounts,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Totals {
    pub projects: NodeCounts,
    pub epics: NodeCounts,
    pub stories: NodeCounts,
}

#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub people: NodeCounts,
    pub projects: Vec<ProjectReport>,
    pub plan: Vec<String>,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl MigrationReport {
    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for project in &self.projects {
            totals.projects.record(project.outcome);
            totals.epics.add(&project.epics);
            totals.stories.add(&project.stories);
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    fn fail(&mut self, path: &NodePath, message: impl std::fmt::Display) {
        let line = format!("{}: {}", path, message);
        warn!("{}", line);
        self.errors.push(line);
    }

    fn plan(&mut self, line: String) {
        debug!("{}", line);
        self.plan.push(line);
    }
}

/// Merge two child ID lists: source order first, then destination-only IDs
/// in destination order, without duplicates
pub fn merge_ids(source: &[String], dest: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(source.len() + dest.len());
    for id in source.iter().chain(dest) {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    merged
}

pub struct MigrationEngine<'a> {
    source: &'a dyn Repository,
    dest: &'a dyn Repository,
    options: MigrationOptions,
    lock_dir: Option<PathBuf>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(
        source: &'a dyn Repository,
        dest: &'a dyn Repository,
        options: MigrationOptions,
    ) -> Self {
        Self {
            source,
            dest,
            options,
            lock_dir: None,
            cancel: None,
        }
    }

    /// Hold a per-project lock file under `dir` during live runs
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Stop before the next project once `flag` is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Walk the whole scope
    ///
    /// Only failing to enumerate projects is an error; every node-level
    /// failure is recorded in the report and the walk continues.
    pub async fn run(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        info!(
            source = %self.source.describe(),
            dest = %self.dest.describe(),
            dry_run = self.options.dry_run,
            force = self.options.force,
            "starting migration"
        );

        self.migrate_people(&mut report).await;

        let projects = match &self.options.scope {
            Scope::Project(name) => vec![name.clone()],
            Scope::All => self.source.list_projects().await?,
        };

        for name in projects {
            if self.cancelled() {
                info!("migration cancelled before project {}", name);
                report.cancelled = true;
                break;
            }

            let _lock = match (&self.lock_dir, self.options.dry_run) {
                (Some(dir), false) => match Lock::acquire_named(dir, &name).await {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        report.fail(&NodePath::project(&name), format!("{:#}", e));
                        report.projects.push(ProjectReport {
                            name,
                            outcome: NodeOutcome::Failed,
                            epics: NodeCounts::default(),
                            stories: NodeCounts::default(),
                        });
                        continue;
                    }
                },
                _ => None,
            };

            let project_report = self.migrate_project(&name, &mut report).await;
            info!(
                project = %name,
                outcome = ?project_report.outcome,
                epics = project_report.epics.total(),
                stories = project_report.stories.total(),
                "project done"
            );
            report.projects.push(project_report);
        }

        Ok(report)
    }

    async fn migrate_people(&self, report: &mut MigrationReport) {
        let path = NodePath::people();
        let people = match self.source.get_people().await {
            Ok(Some(people)) => people,
            Ok(None) => {
                debug!("no people in source");
                report.people.record(NodeOutcome::Skipped);
                return;
            }
            Err(e) => {
                report.fail(&path, format!("read failed: {}", e));
                report.people.record(NodeOutcome::Failed);
                return;
            }
        };

        let outcome = match self.dest.has_people().await {
            Err(e) => {
                report.fail(&path, format!("destination check failed: {}", e));
                NodeOutcome::Failed
            }
            Ok(true) if !self.options.force => NodeOutcome::Skipped,
            Ok(_) if self.options.dry_run => {
                report.plan(format!("[DRY RUN] Would write {} {}", NodeKind::People, path));
                NodeOutcome::Planned
            }
            Ok(_) => match self.dest.put_people(&people).await {
                Ok(()) => NodeOutcome::Written,
                Err(e) => {
                    report.fail(&path, format!("write failed: {}", e));
                    NodeOutcome::Failed
                }
            },
        };
        debug!(node = %path, ?outcome, "node done");
        report.people.record(outcome);
    }

    async fn migrate_project(&self, name: &str, report: &mut MigrationReport) -> ProjectReport {
        let path = NodePath::project(name);
        let mut project_report = ProjectReport {
            name: name.to_string(),
            outcome: NodeOutcome::Failed,
            epics: NodeCounts::default(),
            stories: NodeCounts::default(),
        };

        let source_doc = match self.source.get_project(name).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                report.fail(&path, "not found in source");
                return project_report;
            }
            Err(e) => {
                report.fail(&path, format!("read failed: {}", e));
                return project_report;
            }
        };

        let outcome = match self.dest.has_project(name).await {
            Err(e) => {
                report.fail(&path, format!("destination check failed: {}", e));
                NodeOutcome::Failed
            }
            Ok(true) if !self.options.force => NodeOutcome::Skipped,
            Ok(_) if self.options.dry_run => {
                report.plan(format!("[DRY RUN] Would write {} {}", NodeKind::Project, path));
                NodeOutcome::Planned
            }
            Ok(exists) => {
                let mut doc = source_doc;
                match self.existing_project_ids(name, exists).await {
                    Ok(dest_ids) => {
                        doc.epic_ids = merge_ids(&doc.epic_ids, &dest_ids);
                        match self.dest.put_project(name, &doc).await {
                            Ok(()) => NodeOutcome::Written,
                            Err(e) => {
                                report.fail(&path, format!("write failed: {}", e));
                                NodeOutcome::Failed
                            }
                        }
                    }
                    Err(e) => {
                        report.fail(&path, format!("destination read failed: {}", e));
                        NodeOutcome::Failed
                    }
                }
            }
        };
        debug!(node = %path, ?outcome, "node done");
        project_report.outcome = outcome;
        if outcome == NodeOutcome::Failed {
            return project_report;
        }

        if !self.options.dry_run {
            if let Err(e) = self.dest.register_project(name).await {
                report.fail(&path, format!("index update failed: {}", e));
            }
        }

        let source_order = match self.source.epic_ids(name).await {
            Ok(ids) => ids,
            Err(e) => {
                if self.options.epics.is_none() {
                    report.fail(&path, format!("epic discovery failed: {}", e));
                } else {
                    warn!(project = name, error = %e, "source epic order unavailable");
                }
                Vec::new()
            }
        };
        let epics = match &self.options.epics {
            Some(selected) => selected.clone(),
            None => source_order.clone(),
        };

        let mut migrated = Vec::new();
        for epic in epics {
            let outcome = self
                .migrate_epic(name, &epic, &mut project_report, report)
                .await;
            project_report.epics.record(outcome);
            if outcome != NodeOutcome::Failed {
                migrated.push(epic);
            }
        }

        self.reconcile_epic_list(name, &source_order, &migrated, report)
            .await;
        project_report
    }

    async fn existing_project_ids(&self, name: &str, exists: bool) -> Result<Vec<String>> {
        if !exists {
            return Ok(Vec::new());
        }
        Ok(self
            .dest
            .get_project(name)
            .await?
            .map(|doc| doc.epic_ids)
            .unwrap_or_default())
    }

    async fn migrate_epic(
        &self,
        project: &str,
        epic: &str,
        project_report: &mut ProjectReport,
        report: &mut MigrationReport,
    ) -> NodeOutcome {
        let path = NodePath::epic(project, epic);

        let source_doc = match self.source.get_epic(project, epic).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                report.fail(&path, "not found in source");
                return NodeOutcome::Failed;
            }
            Err(e) => {
                report.fail(&path, format!("read failed: {}", e));
                return NodeOutcome::Failed;
            }
        };

        let outcome = match self.dest.has_epic(project, epic).await {
            Err(e) => {
                report.fail(&path, format!("destination check failed: {}", e));
                NodeOutcome::Failed
            }
            Ok(true) if !self.options.force => NodeOutcome::Skipped,
            Ok(_) if self.options.dry_run => {
                report.plan(format!("[DRY RUN] Would write {} {}", NodeKind::Epic, path));
                NodeOutcome::Planned
            }
            Ok(exists) => {
                let existing = if exists {
                    self.dest.get_epic(project, epic).await
                } else {
                    Ok(None)
                };
                match existing {
                    Ok(existing) => {
                        let mut doc = source_doc;
                        if let Some(existing) = existing {
                            doc.story_ids = merge_ids(&doc.story_ids, &existing.story_ids);
                        }
                        match self.dest.put_epic(project, epic, &doc).await {
                            Ok(()) => NodeOutcome::Written,
                            Err(e) => {
                                report.fail(&path, format!("write failed: {}", e));
                                NodeOutcome::Failed
                            }
                        }
                    }
                    Err(e) => {
                        report.fail(&path, format!("destination read failed: {}", e));
                        NodeOutcome::Failed
                    }
                }
            }
        };
        debug!(node = %path, ?outcome, "node done");
        if outcome == NodeOutcome::Failed {
            return outcome;
        }

        let stories = match self.source.story_ids(project, epic).await {
            Ok(ids) => ids,
            Err(e) => {
                report.fail(&path, format!("story discovery failed: {}", e));
                Vec::new()
            }
        };

        let mut migrated = Vec::new();
        for story in &stories {
            let story_outcome = self.migrate_story(project, epic, story, report).await;
            project_report.stories.record(story_outcome);
            if story_outcome != NodeOutcome::Failed {
                migrated.push(story.clone());
            }
        }

        self.reconcile_story_list(project, epic, &stories, &migrated, report)
            .await;
        outcome
    }

    async fn migrate_story(
        &self,
        project: &str,
        epic: &str,
        story: &str,
        report: &mut MigrationReport,
    ) -> NodeOutcome {
        let path = NodePath::story(project, epic, story);

        let doc = match self.source.get_story(project, epic, story).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                report.fail(&path, "not found in source");
                return NodeOutcome::Failed;
            }
            Err(e) => {
                report.fail(&path, format!("read failed: {}", e));
                return NodeOutcome::Failed;
            }
        };

        let outcome = match self.dest.has_story(project, epic, story).await {
            Err(e) => {
                report.fail(&path, format!("destination check failed: {}", e));
                NodeOutcome::Failed
            }
            Ok(true) if !self.options.force => NodeOutcome::Skipped,
            Ok(_) if self.options.dry_run => {
                report.plan(format!("[DRY RUN] Would write {} {}", NodeKind::Story, path));
                NodeOutcome::Planned
            }
            Ok(_) => match self.dest.put_story(project, epic, story, &doc).await {
                Ok(()) => NodeOutcome::Written,
                Err(e) => {
                    report.fail(&path, format!("write failed: {}", e));
                    NodeOutcome::Failed
                }
            },
        };
        debug!(node = %path, ?outcome, "node done");
        outcome
    }

    async fn reconcile_epic_list(
        &self,
        project: &str,
        order: &[String],
        migrated: &[String],
        report: &mut MigrationReport,
    ) {
        let path = NodePath::project(project);
        let stored = match self.dest.stored_epic_ids(project).await {
            Ok(stored) => stored,
            Err(e) => {
                report.fail(&path, format!("epic list read failed: {}", e));
                return;
            }
        };
        let Some(merged) = reconciled(order, migrated, stored) else {
            return;
        };

        if self.options.dry_run {
            report.plan(format!(
                "[DRY RUN] Would set epic list of {} to [{}]",
                path,
                merged.join(", ")
            ));
        } else if let Err(e) = self.dest.set_epic_ids(project, &merged).await {
            report.fail(&path, format!("epic list write failed: {}", e));
        }
    }

    async fn reconcile_story_list(
        &self,
        project: &str,
        epic: &str,
        order: &[String],
        migrated: &[String],
        report: &mut MigrationReport,
    ) {
        let path = NodePath::epic(project, epic);
        let stored = match self.dest.stored_story_ids(project, epic).await {
            Ok(stored) => stored,
            Err(e) => {
                report.fail(&path, format!("story list read failed: {}", e));
                return;
            }
        };
        let Some(merged) = reconciled(order, migrated, stored) else {
            return;
        };

        if self.options.dry_run {
            report.plan(format!(
                "[DRY RUN] Would set story list of {} to [{}]",
                path,
                merged.join(", ")
            ));
        } else if let Err(e) = self.dest.set_story_ids(project, epic, &merged).await {
            report.fail(&path, format!("story list write failed: {}", e));
        }
    }
}

/// The list to write, or `None` when the stored list is already merged
///
/// The source side keeps the source's full child order, limited to IDs that
/// were migrated this run or are already stored. Children outside the run
/// (unselected or failed) keep their stored position.
fn reconciled(
    order: &[String],
    migrated: &[String],
    stored: Option<Vec<String>>,
) -> Option<Vec<String>> {
    let stored_ids = stored.as_deref().unwrap_or_default();
    let mut side: Vec<String> = order
        .iter()
        .filter(|id| migrated.contains(id) || stored_ids.contains(id))
        .cloned()
        .collect();
    for id in migrated {
        if !side.contains(id) {
            side.push(id.clone());
        }
    }

    match stored {
        Some(stored) => {
            let merged = merge_ids(&side, &stored);
            (merged != stored).then_some(merged)
        }
        None => Some(merge_ids(&side, &[])),
    }
}
