//! Tree migration between a local data directory and an in-memory store

use async_trait::async_trait;
use pmkv::backend::{BackendError, KvBackend, MemoryBackend};
use pmkv::command::Command;
use pmkv::kv::KvRepository;
use pmkv::local::LocalRepository;
use pmkv::migrate::{MigrationEngine, MigrationOptions, MigrationReport, Scope};
use pmkv::repository::Repository;
use pmkv::types::{Epic, Project, Story};
use serde_json::{json, Map, Value};
use similar_asserts::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn story(title: &str) -> Story {
    let mut extra = Map::new();
    extra.insert("title".to_string(), json!(title));
    Story::new(extra)
}

fn memory_kv() -> KvRepository {
    KvRepository::new(Arc::new(MemoryBackend::new()))
}

/// `acme` with epic `onboarding` holding stories S1 and S2
async fn acme_tree() -> (TempDir, LocalRepository) {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalRepository::open(dir.path());
    local
        .put_people(&json!([{"id": 1, "name": "Ada"}]))
        .await
        .unwrap();
    local
        .put_project("acme", &Project::new(ids(&["onboarding"])))
        .await
        .unwrap();
    local
        .put_epic("acme", "onboarding", &Epic::new(ids(&["S1", "S2"])))
        .await
        .unwrap();
    local
        .put_story("acme", "onboarding", "S1", &story("Sign up"))
        .await
        .unwrap();
    local
        .put_story("acme", "onboarding", "S2", &story("Verify email"))
        .await
        .unwrap();
    (dir, local)
}

async fn migrate(
    source: &dyn Repository,
    dest: &dyn Repository,
    options: MigrationOptions,
) -> MigrationReport {
    MigrationEngine::new(source, dest, options)
        .run()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_acme_into_empty_store() {
    let (_dir, local) = acme_tree().await;
    let kv = memory_kv();

    let report = migrate(&local, &kv, MigrationOptions::default()).await;
    let totals = report.totals();

    assert_eq!(report.errors, Vec::<String>::new());
    assert_eq!(report.people.written, 1);
    assert_eq!(totals.projects.written, 1);
    assert_eq!(totals.epics.written, 1);
    assert_eq!(totals.stories.written, 2);

    let epic = kv.get_epic("acme", "onboarding").await.unwrap().unwrap();
    assert_eq!(epic.story_ids, ids(&["S1", "S2"]));
    assert_eq!(
        kv.get_list("pm:project:acme:epics:list").await.unwrap(),
        Some(ids(&["onboarding"]))
    );
    assert_eq!(
        kv.get_list("pm:project:acme:epic:onboarding:stories:list")
            .await
            .unwrap(),
        Some(ids(&["S1", "S2"]))
    );
    assert_eq!(
        kv.get_story("acme", "onboarding", "S2").await.unwrap(),
        Some(story("Verify email"))
    );
    assert_eq!(kv.projects_index().await.unwrap(), Some(ids(&["acme"])));
    assert!(kv.get_people().await.unwrap().is_some());
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let (_dir, local) = acme_tree().await;
    let kv = memory_kv();
    migrate(&local, &kv, MigrationOptions::default()).await;

    let mut before = Vec::new();
    for key in kv.keys("pm:*").await.unwrap() {
        before.push((key.clone(), kv.get_raw(&key).await.unwrap()));
    }

    let report = migrate(&local, &kv, MigrationOptions::default()).await;
    let totals = report.totals();
    assert_eq!(report.people.written, 0);
    assert_eq!(totals.projects.written, 0);
    assert_eq!(totals.epics.written, 0);
    assert_eq!(totals.stories.written, 0);
    assert_eq!(totals.stories.skipped, 2);
    assert!(report.plan.is_empty());

    let mut after = Vec::new();
    for key in kv.keys("pm:*").await.unwrap() {
        after.push((key.clone(), kv.get_raw(&key).await.unwrap()));
    }
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_epic_list_keeps_source_order_then_destination_extras() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalRepository::open(dir.path());
    local
        .put_project("acme", &Project::new(ids(&["A", "B"])))
        .await
        .unwrap();
    local.put_epic("acme", "A", &Epic::default()).await.unwrap();
    local.put_epic("acme", "B", &Epic::default()).await.unwrap();

    let kv = memory_kv();
    kv.put_project("acme", &Project::new(ids(&["B", "C"])))
        .await
        .unwrap();
    kv.set_epic_ids("acme", &ids(&["B", "C"])).await.unwrap();
    kv.put_epic("acme", "C", &Epic::default()).await.unwrap();

    let report = migrate(&local, &kv, MigrationOptions::default()).await;
    assert!(!report.has_failures(), "{:?}", report.errors);
    assert_eq!(
        kv.stored_epic_ids("acme").await.unwrap(),
        Some(ids(&["A", "B", "C"]))
    );

    migrate(&local, &kv, MigrationOptions::default()).await;
    assert_eq!(
        kv.stored_epic_ids("acme").await.unwrap(),
        Some(ids(&["A", "B", "C"]))
    );
}

#[tokio::test]
async fn test_force_overwrites_but_keeps_destination_stories() {
    let (_dir, local) = acme_tree().await;
    let kv = memory_kv();
    migrate(&local, &kv, MigrationOptions::default()).await;

    // A story only the store knows about
    kv.put_story("acme", "onboarding", "S9", &story("Extra"))
        .await
        .unwrap();
    kv.set_story_ids("acme", "onboarding", &ids(&["S1", "S2", "S9"]))
        .await
        .unwrap();
    let mut epic = kv.get_epic("acme", "onboarding").await.unwrap().unwrap();
    epic.story_ids.push("S9".to_string());
    kv.put_epic("acme", "onboarding", &epic).await.unwrap();

    let report = migrate(
        &local,
        &kv,
        MigrationOptions {
            force: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(report.totals().stories.written, 2);

    let epic = kv.get_epic("acme", "onboarding").await.unwrap().unwrap();
    assert_eq!(epic.story_ids, ids(&["S1", "S2", "S9"]));
    assert_eq!(
        kv.stored_story_ids("acme", "onboarding").await.unwrap(),
        Some(ids(&["S1", "S2", "S9"]))
    );
    assert!(kv.has_story("acme", "onboarding", "S9").await.unwrap());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let (_dir, local) = acme_tree().await;
    let backend = Arc::new(MemoryBackend::new());
    let kv = KvRepository::new(backend.clone());

    let report = migrate(
        &local,
        &kv,
        MigrationOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .await;

    assert!(backend.is_empty());
    assert_eq!(report.totals().stories.planned, 2);
    assert!(report
        .plan
        .contains(&"[DRY RUN] Would write project acme".to_string()));
    assert!(report
        .plan
        .contains(&"[DRY RUN] Would write story acme/onboarding/S1".to_string()));
    assert!(report
        .plan
        .iter()
        .any(|line| line.starts_with("[DRY RUN] Would set story list of acme/onboarding")));
}

/// Fails every SET of one key, passes everything else through
struct FailingBackend {
    inner: MemoryBackend,
    fail_key: String,
}

#[async_trait]
impl KvBackend for FailingBackend {
    async fn execute(&self, command: &Command) -> Result<Value, BackendError> {
        if let Command::Set { key, .. } = command {
            if *key == self.fail_key {
                return Err(BackendError::Remote("injected failure".to_string()));
            }
        }
        self.inner.execute(command).await
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn test_failed_story_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalRepository::open(dir.path());
    let all = ids(&["S1", "S2", "S3", "S4"]);
    local
        .put_project("acme", &Project::new(ids(&["onboarding"])))
        .await
        .unwrap();
    local
        .put_epic("acme", "onboarding", &Epic::new(all.clone()))
        .await
        .unwrap();
    for id in &all {
        local
            .put_story("acme", "onboarding", id, &story(id))
            .await
            .unwrap();
    }

    let kv = KvRepository::new(Arc::new(FailingBackend {
        inner: MemoryBackend::new(),
        fail_key: "pm:project:acme:epic:onboarding:story:S3".to_string(),
    }));

    let report = migrate(&local, &kv, MigrationOptions::default()).await;
    let totals = report.totals();
    assert_eq!(totals.stories.written, 3);
    assert_eq!(totals.stories.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("acme/onboarding/S3: write failed"));
    assert!(report.has_failures());

    for id in ["S1", "S2", "S4"] {
        assert!(kv.has_story("acme", "onboarding", id).await.unwrap());
    }
    assert_eq!(
        kv.stored_story_ids("acme", "onboarding").await.unwrap(),
        Some(ids(&["S1", "S2", "S4"]))
    );
}

#[tokio::test]
async fn test_missing_source_epic_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalRepository::open(dir.path());
    local
        .put_project("acme", &Project::new(ids(&["onboarding"])))
        .await
        .unwrap();

    let kv = memory_kv();
    let report = migrate(
        &local,
        &kv,
        MigrationOptions {
            scope: Scope::Project("acme".to_string()),
            epics: Some(ids(&["ghost"])),
            ..Default::default()
        },
    )
    .await;

    assert_eq!(report.errors, vec!["acme/ghost: not found in source".to_string()]);
    assert_eq!(report.totals().epics.failed, 1);
    assert!(kv.has_project("acme").await.unwrap());
}

#[tokio::test]
async fn test_epic_subset_only_touches_selected_epics() {
    let (_dir, local) = acme_tree().await;
    local
        .put_epic("acme", "billing", &Epic::new(ids(&["B1"])))
        .await
        .unwrap();
    local
        .put_story("acme", "billing", "B1", &story("Invoice"))
        .await
        .unwrap();

    let kv = memory_kv();
    let report = migrate(
        &local,
        &kv,
        MigrationOptions {
            scope: Scope::Project("acme".to_string()),
            epics: Some(ids(&["billing"])),
            ..Default::default()
        },
    )
    .await;

    assert!(!report.has_failures());
    assert_eq!(report.projects.len(), 1);
    assert!(kv.has_story("acme", "billing", "B1").await.unwrap());
    assert!(!kv.has_epic("acme", "onboarding").await.unwrap());
    assert_eq!(
        kv.stored_epic_ids("acme").await.unwrap(),
        Some(ids(&["billing"]))
    );
}

/// `acme_tree` plus a second epic `billing`, both listed in the project
async fn acme_with_billing() -> (TempDir, LocalRepository) {
    let (dir, local) = acme_tree().await;
    local
        .put_project("acme", &Project::new(ids(&["onboarding", "billing"])))
        .await
        .unwrap();
    local
        .put_epic("acme", "billing", &Epic::new(ids(&["B1"])))
        .await
        .unwrap();
    local
        .put_story("acme", "billing", "B1", &story("Invoice"))
        .await
        .unwrap();
    (dir, local)
}

#[tokio::test]
async fn test_subset_export_keeps_epic_list_order() {
    let (_dir, local) = acme_with_billing().await;
    let kv = memory_kv();
    migrate(&local, &kv, MigrationOptions::default()).await;
    assert_eq!(
        kv.stored_epic_ids("acme").await.unwrap(),
        Some(ids(&["onboarding", "billing"]))
    );

    let report = migrate(
        &local,
        &kv,
        MigrationOptions {
            scope: Scope::Project("acme".to_string()),
            force: true,
            epics: Some(ids(&["billing"])),
            ..Default::default()
        },
    )
    .await;

    assert!(!report.has_failures(), "{:?}", report.errors);
    assert_eq!(report.totals().epics.written, 1);
    assert_eq!(
        kv.stored_epic_ids("acme").await.unwrap(),
        Some(ids(&["onboarding", "billing"]))
    );
    assert_eq!(
        kv.get_project("acme").await.unwrap().unwrap().epic_ids,
        ids(&["onboarding", "billing"])
    );
}

#[tokio::test]
async fn test_failed_sibling_keeps_epic_list_order() {
    let (dir, local) = acme_with_billing().await;
    let kv = memory_kv();
    migrate(&local, &kv, MigrationOptions::default()).await;

    std::fs::write(
        dir.path().join("projects/acme/epics/onboarding/epic.json"),
        "{not json",
    )
    .unwrap();

    let report = migrate(
        &local,
        &kv,
        MigrationOptions {
            force: true,
            ..Default::default()
        },
    )
    .await;

    assert_eq!(report.totals().epics.failed, 1);
    assert!(report.errors[0].starts_with("acme/onboarding: read failed"));
    assert_eq!(
        kv.stored_epic_ids("acme").await.unwrap(),
        Some(ids(&["onboarding", "billing"]))
    );
}

#[tokio::test]
async fn test_pull_into_local_tree() {
    let kv = memory_kv();
    kv.put_project("acme", &Project::new(ids(&["onboarding"])))
        .await
        .unwrap();
    kv.set_epic_ids("acme", &ids(&["onboarding"])).await.unwrap();
    kv.put_epic("acme", "onboarding", &Epic::new(ids(&["S1"])))
        .await
        .unwrap();
    kv.set_story_ids("acme", "onboarding", &ids(&["S1", "S2"]))
        .await
        .unwrap();
    kv.put_story("acme", "onboarding", "S1", &story("Sign up"))
        .await
        .unwrap();
    kv.put_story("acme", "onboarding", "S2", &story("Verify email"))
        .await
        .unwrap();
    kv.set_projects_index(&ids(&["acme"])).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let local = LocalRepository::open(dir.path());
    let report = migrate(&kv, &local, MigrationOptions::default()).await;

    assert!(!report.has_failures(), "{:?}", report.errors);
    assert_eq!(report.totals().stories.written, 2);
    assert!(dir
        .path()
        .join("projects/acme/epics/onboarding/stories/S2.json")
        .is_file());

    let epic = local.get_epic("acme", "onboarding").await.unwrap().unwrap();
    assert_eq!(epic.story_ids, ids(&["S1", "S2"]));
    assert_eq!(local.list_projects().await.unwrap(), ids(&["acme"]));
}

#[tokio::test]
async fn test_cancelled_run_stops_before_projects() {
    let (_dir, local) = acme_tree().await;
    let kv = memory_kv();

    let report = MigrationEngine::new(&local, &kv, MigrationOptions::default())
        .with_cancel(Arc::new(AtomicBool::new(true)))
        .run()
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.projects.is_empty());
    assert!(!kv.has_project("acme").await.unwrap());
}

/// Records whether the project's lock file exists when its document is written
struct LockWatchBackend {
    inner: MemoryBackend,
    lock_file: std::path::PathBuf,
    held_during_write: AtomicBool,
}

#[async_trait]
impl KvBackend for LockWatchBackend {
    async fn execute(&self, command: &Command) -> Result<Value, BackendError> {
        if let Command::Set { key, .. } = command {
            if key == "pm:project:acme" {
                self.held_during_write
                    .store(self.lock_file.exists(), Ordering::SeqCst);
            }
        }
        self.inner.execute(command).await
    }

    fn name(&self) -> &'static str {
        "lock-watch"
    }
}

#[tokio::test]
async fn test_live_run_holds_project_lock() {
    let (_dir, local) = acme_tree().await;
    let locks = tempfile::tempdir().unwrap();
    let backend = Arc::new(LockWatchBackend {
        inner: MemoryBackend::new(),
        lock_file: locks.path().join("acme.lock"),
        held_during_write: AtomicBool::new(false),
    });
    let kv = KvRepository::new(backend.clone());

    let report = MigrationEngine::new(&local, &kv, MigrationOptions::default())
        .with_lock_dir(locks.path())
        .run()
        .await
        .unwrap();

    assert!(!report.has_failures());
    assert!(backend.held_during_write.load(Ordering::SeqCst));
    // Released once the project is done
    assert!(!locks.path().join("acme.lock").exists());
}

#[tokio::test]
async fn test_invalid_scope_name_takes_no_lock() {
    let (_dir, local) = acme_tree().await;
    let kv = memory_kv();
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("victim.lock"), "not-a-pid").unwrap();

    let report = MigrationEngine::new(
        &local,
        &kv,
        MigrationOptions {
            scope: Scope::Project("../../victim".to_string()),
            ..Default::default()
        },
    )
    .with_lock_dir(root.path().join("data/.locks"))
    .run()
    .await
    .unwrap();

    assert_eq!(report.totals().projects.failed, 1);
    assert_eq!(
        std::fs::read_to_string(root.path().join("victim.lock")).unwrap(),
        "not-a-pid"
    );
}
