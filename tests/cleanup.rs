//! Project cleanup against an in-memory store

use async_trait::async_trait;
use pmkv::backend::{BackendError, KvBackend, MemoryBackend};
use pmkv::cleanup::{CleanupEngine, CleanupOptions};
use pmkv::command::Command;
use pmkv::error::TrackerError;
use pmkv::kv::KvRepository;
use pmkv::repository::Repository;
use pmkv::types::{Epic, Project, Story};
use serde_json::Value;
use similar_asserts::assert_eq;
use std::sync::Arc;

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

const CONFIRM: CleanupOptions = CleanupOptions {
    dry_run: false,
    confirm: true,
};

const DRY_RUN: CleanupOptions = CleanupOptions {
    dry_run: true,
    confirm: false,
};

/// `acme` with two epics and three stories, plus an untouched `beta`
async fn seeded() -> KvRepository {
    seed(KvRepository::new(Arc::new(MemoryBackend::new()))).await
}

async fn seed(kv: KvRepository) -> KvRepository {

    kv.put_project("acme", &Project::new(ids(&["onboarding", "billing"])))
        .await
        .unwrap();
    kv.set_epic_ids("acme", &ids(&["onboarding", "billing"]))
        .await
        .unwrap();
    kv.put_epic("acme", "onboarding", &Epic::new(ids(&["S1", "S2"])))
        .await
        .unwrap();
    kv.set_story_ids("acme", "onboarding", &ids(&["S1", "S2"]))
        .await
        .unwrap();
    kv.put_epic("acme", "billing", &Epic::new(ids(&["B1"])))
        .await
        .unwrap();
    kv.set_story_ids("acme", "billing", &ids(&["B1"]))
        .await
        .unwrap();
    for (epic, story) in [("onboarding", "S1"), ("onboarding", "S2"), ("billing", "B1")] {
        kv.put_story("acme", epic, story, &Story::default())
            .await
            .unwrap();
    }

    kv.put_project("beta", &Project::new(ids(&["core"])))
        .await
        .unwrap();
    kv.put_epic("beta", "core", &Epic::default()).await.unwrap();

    kv.set_projects_index(&ids(&["beta", "acme", "gamma"]))
        .await
        .unwrap();
    kv
}

#[tokio::test]
async fn test_confirmed_cleanup_removes_every_project_key() {
    let kv = seeded().await;

    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();

    assert!(!report.has_failures(), "{:?}", report.errors);
    assert_eq!(report.deleted, report.plan.keys.len());
    assert_eq!(report.plan.epics, ids(&["onboarding", "billing"]));
    assert_eq!(report.plan.stories, 3);
    assert!(report.index_updated);

    assert_eq!(kv.keys("pm:project:acme*").await.unwrap(), Vec::<String>::new());
    assert_eq!(
        kv.projects_index().await.unwrap(),
        Some(ids(&["beta", "gamma"]))
    );
    assert!(kv.has_project("beta").await.unwrap());
    assert!(kv.has_epic("beta", "core").await.unwrap());
}

#[tokio::test]
async fn test_plan_key_order() {
    let kv = seeded().await;
    let plan = CleanupEngine::new(&kv, DRY_RUN)
        .discover("acme")
        .await
        .unwrap();

    assert_eq!(
        plan.keys,
        ids(&[
            "pm:project:acme",
            "pm:project:acme:epics:list",
            "pm:project:acme:epic:onboarding",
            "pm:project:acme:epic:onboarding:stories:list",
            "pm:project:acme:epic:onboarding:story:S1",
            "pm:project:acme:epic:onboarding:story:S2",
            "pm:project:acme:epic:billing",
            "pm:project:acme:epic:billing:stories:list",
            "pm:project:acme:epic:billing:story:B1",
        ])
    );
    assert!(!plan.used_fallback);
    assert!(plan.index_contains_project);
}

#[tokio::test]
async fn test_unconfirmed_run_is_refused() {
    let kv = seeded().await;
    let before = kv.keys("pm:*").await.unwrap();

    let err = CleanupEngine::new(&kv, CleanupOptions::default())
        .run("acme")
        .await
        .unwrap_err();

    assert!(matches!(err, TrackerError::SafetyGate));
    assert_eq!(kv.keys("pm:*").await.unwrap(), before);
}

#[tokio::test]
async fn test_dry_run_deletes_nothing() {
    let kv = seeded().await;
    let before = kv.keys("pm:*").await.unwrap();

    let report = CleanupEngine::new(&kv, DRY_RUN).run("acme").await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.plan.keys.len(), 9);
    assert_eq!(kv.keys("pm:*").await.unwrap(), before);
    assert!(!report.index_updated);
}

#[tokio::test]
async fn test_missing_project_document_falls_back_to_epics_list() {
    let kv = seeded().await;
    kv.delete_key("pm:project:acme").await.unwrap();

    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();

    assert!(report.plan.used_fallback);
    assert_eq!(report.plan.epics, ids(&["onboarding", "billing"]));
    assert_eq!(report.missing, 1);
    assert_eq!(kv.keys("pm:project:acme*").await.unwrap(), Vec::<String>::new());
}

#[tokio::test]
async fn test_stories_come_from_list_and_epic_document() {
    let kv = seeded().await;
    // S3 is only in the document, S4 only in the list
    kv.put_epic("acme", "onboarding", &Epic::new(ids(&["S1", "S2", "S3"])))
        .await
        .unwrap();
    kv.set_story_ids("acme", "onboarding", &ids(&["S1", "S2", "S4"]))
        .await
        .unwrap();

    let plan = CleanupEngine::new(&kv, DRY_RUN)
        .discover("acme")
        .await
        .unwrap();

    assert!(plan
        .keys
        .contains(&"pm:project:acme:epic:onboarding:story:S3".to_string()));
    assert!(plan
        .keys
        .contains(&"pm:project:acme:epic:onboarding:story:S4".to_string()));
    assert_eq!(plan.stories, 5);
}

#[tokio::test]
async fn test_unreferenced_keys_are_swept() {
    let kv = seeded().await;
    kv.set_raw("pm:project:acme:epic:old:story:X1", "{}".to_string())
        .await
        .unwrap();
    kv.set_raw("pm:project:acmeco", "{}".to_string())
        .await
        .unwrap();

    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();

    assert_eq!(report.plan.orphans, 1);
    assert_eq!(kv.keys("pm:project:acme:*").await.unwrap(), Vec::<String>::new());
    assert!(kv.key_exists("pm:project:acmeco").await.unwrap());
}

#[tokio::test]
async fn test_index_edit_is_independent_of_key_deletion() {
    let kv = seeded().await;
    kv.set_projects_index(&ids(&["beta"])).await.unwrap();

    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();
    assert!(!report.index_updated);
    assert!(report.deleted > 0);
    assert_eq!(kv.projects_index().await.unwrap(), Some(ids(&["beta"])));

    // No index at all: the key stays absent
    let kv = seeded().await;
    kv.delete_key("pm:projects").await.unwrap();
    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();
    assert!(!report.index_updated);
    assert_eq!(kv.get_raw("pm:projects").await.unwrap(), None);
}

#[tokio::test]
async fn test_live_cleanup_releases_lock() {
    let kv = seeded().await;
    let locks = tempfile::tempdir().unwrap();

    CleanupEngine::new(&kv, CONFIRM)
        .with_lock_dir(locks.path())
        .run("acme")
        .await
        .unwrap();

    assert!(!locks.path().join("acme.lock").exists());
}

/// Fails GET or DEL of one key, passes everything else through
struct FlakyBackend {
    inner: MemoryBackend,
    fail_get: Option<&'static str>,
    fail_del: Option<&'static str>,
}

#[async_trait]
impl KvBackend for FlakyBackend {
    async fn execute(&self, command: &Command) -> Result<Value, BackendError> {
        let hit = match command {
            Command::Get { key } => self.fail_get == Some(key.as_str()),
            Command::Del { keys } => keys.iter().any(|k| self.fail_del == Some(k.as_str())),
            _ => false,
        };
        if hit {
            return Err(BackendError::Remote("transient".to_string()));
        }
        self.inner.execute(command).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

async fn flaky(fail_get: Option<&'static str>, fail_del: Option<&'static str>) -> KvRepository {
    seed(KvRepository::new(Arc::new(FlakyBackend {
        inner: MemoryBackend::new(),
        fail_get,
        fail_del,
    })))
    .await
}

#[tokio::test]
async fn test_unreadable_stories_list_does_not_stop_cleanup() {
    let kv = flaky(Some("pm:project:acme:epic:billing:stories:list"), None).await;

    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0]
        .starts_with("pm:project:acme:epic:billing:stories:list: read failed"));
    assert!(report.has_failures());
    // B1 still comes from the epic document
    assert_eq!(report.plan.stories, 3);
    assert_eq!(kv.keys("pm:project:acme*").await.unwrap(), Vec::<String>::new());
    assert_eq!(
        kv.projects_index().await.unwrap(),
        Some(ids(&["beta", "gamma"]))
    );
}

#[tokio::test]
async fn test_failed_delete_continues_and_edits_index() {
    let stuck = "pm:project:acme:epic:onboarding:story:S1";
    let kv = flaky(None, Some(stuck)).await;

    let report = CleanupEngine::new(&kv, CONFIRM).run("acme").await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.deleted, report.plan.keys.len() - 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with(&format!("{}: delete failed", stuck)));
    assert!(report.index_updated);
    assert_eq!(kv.keys("pm:project:acme*").await.unwrap(), ids(&[stuck]));
    assert_eq!(
        kv.projects_index().await.unwrap(),
        Some(ids(&["beta", "gamma"]))
    );
}

#[tokio::test]
async fn test_sweep_handles_glob_characters_in_project_name() {
    let kv = seeded().await;
    kv.put_project("a[b]", &Project::new(ids(&["e"])))
        .await
        .unwrap();
    kv.set_raw("pm:project:a[b]:epic:old:story:X1", "{}".to_string())
        .await
        .unwrap();
    kv.set_raw("pm:project:ab", "{}".to_string()).await.unwrap();

    let report = CleanupEngine::new(&kv, CONFIRM).run("a[b]").await.unwrap();

    assert!(!report.has_failures(), "{:?}", report.errors);
    assert_eq!(report.plan.orphans, 1);
    assert!(!kv.key_exists("pm:project:a[b]").await.unwrap());
    assert!(!kv
        .key_exists("pm:project:a[b]:epic:old:story:X1")
        .await
        .unwrap());
    assert!(kv.key_exists("pm:project:ab").await.unwrap());
}

#[tokio::test]
async fn test_invalid_project_name_takes_no_lock() {
    let root = tempfile::tempdir().unwrap();
    let locks = root.path().join("data/.locks");
    std::fs::write(root.path().join("victim.lock"), "not-a-pid").unwrap();
    let kv = seeded().await;

    let err = CleanupEngine::new(&kv, CONFIRM)
        .with_lock_dir(&locks)
        .run("../../victim")
        .await
        .unwrap_err();

    assert!(matches!(err, TrackerError::InvalidName(_)));
    assert!(root.path().join("victim.lock").exists());
}
