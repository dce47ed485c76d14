use async_trait::async_trait;
use cairn_core::settings::{ACTIVE_PROFILES, DELETE_PROFILE, LOGGED_IN_PROFILE, PROFILES};
use cairn_core::{
    CoreError, DataAccess, MemorySettings, ProfileId, ProfileManager, ProfileState,
    SettingsStore, HOTKEYS_FILE, PROFILE_SUBFOLDERS,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn manager_with(doc: serde_json::Value) -> (TempDir, Arc<MemorySettings>, ProfileManager) {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(MemorySettings::with_document(doc));
    let mgr = ProfileManager::new(settings.clone(), DataAccess::new(dir.path()));
    (dir, settings, mgr)
}

fn assert_layout(dir: &TempDir, id: u32) {
    let root = dir.path().join("profiles").join(id.to_string());
    assert!(root.is_dir(), "missing {}", root.display());
    assert!(root.join(HOTKEYS_FILE).is_file());
    for sub in PROFILE_SUBFOLDERS {
        assert!(root.join(sub).is_dir(), "missing {sub}");
    }
}

#[tokio::test]
async fn fresh_install_gets_default_profile() {
    let (dir, settings, mgr) = manager_with(json!({}));
    let report = mgr.ensure_default_layout().await.unwrap();

    assert!(report.reset_active_list);
    assert!(report.repaired_logged_in);
    assert!(dir.path().join("backups").is_dir());
    assert_layout(&dir, 1);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn invalid_entries_are_dropped_and_valid_profiles_kept() {
    let (dir, settings, mgr) = manager_with(json!({
        "profiles": {"activeProfiles": [1, 2, 3, "x", -4, 2.5], "loggedInProfile": 3}
    }));
    let report = mgr.ensure_default_layout().await.unwrap();

    assert!(!report.reset_active_list);
    assert!(!report.repaired_logged_in);
    assert_eq!(report.dropped_entries, 3);
    for id in 1..=3 {
        assert_layout(&dir, id);
    }
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1, 2, 3])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(3)));
}

#[tokio::test]
async fn list_without_any_profile_id_falls_back_to_default() {
    let (dir, settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": ["a", null], "loggedInProfile": 7}}));
    let report = mgr.ensure_default_layout().await.unwrap();
    assert!(report.reset_active_list);
    assert_layout(&dir, 1);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn corrupt_active_list_is_rebuilt() {
    let (dir, settings, mgr) = manager_with(json!({"profiles": {"activeProfiles": "oops"}}));
    mgr.ensure_default_layout().await.unwrap();
    assert_layout(&dir, 1);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
}

#[tokio::test]
async fn ensure_default_layout_is_idempotent() {
    let (dir, _settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 2], "loggedInProfile": 2}}));
    let first = mgr.ensure_default_layout().await.unwrap();
    assert!(first.created_dirs > 0);
    assert_eq!(first.created_files, 2);

    // user data written between runs must survive
    let hotkeys = dir.path().join("profiles/2").join(HOTKEYS_FILE);
    std::fs::write(&hotkeys, r#"{"custom":true}"#).unwrap();
    std::fs::write(dir.path().join("profiles/2/scripts/a.js"), "x").unwrap();

    let second = mgr.ensure_default_layout().await.unwrap();
    assert!(second.is_noop(), "{second:?}");
    assert_eq!(std::fs::read_to_string(&hotkeys).unwrap(), r#"{"custom":true}"#);
    assert!(dir.path().join("profiles/2/scripts/a.js").exists());
}

#[tokio::test]
async fn hotkeys_copied_from_packaged_defaults() {
    let dir = TempDir::new().unwrap();
    let defaults = dir.path().join("pkg");
    std::fs::create_dir_all(&defaults).unwrap();
    std::fs::write(defaults.join(HOTKEYS_FILE), r#"{"default":1}"#).unwrap();
    let settings = Arc::new(MemorySettings::new());
    let mgr = ProfileManager::new(
        settings,
        DataAccess::new(dir.path().join("data")).with_defaults_dir(&defaults),
    );
    mgr.ensure_default_layout().await.unwrap();
    let copied = std::fs::read_to_string(dir.path().join("data/profiles/1").join(HOTKEYS_FILE)).unwrap();
    assert_eq!(copied, r#"{"default":1}"#);
}

#[tokio::test]
async fn stale_logged_in_profile_falls_back_to_first() {
    let (_dir, settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 2], "loggedInProfile": 3}}));
    let id = mgr.resolve_logged_in_profile().await.unwrap();
    assert_eq!(id, ProfileId(1));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn resolve_keeps_valid_logged_in_profile() {
    let (_dir, _settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [4, 7], "loggedInProfile": 7}}));
    assert_eq!(mgr.resolve_logged_in_profile().await.unwrap(), ProfileId(7));
}

#[tokio::test]
async fn resolve_always_returns_a_member_of_the_active_list() {
    let lists: [&[u32]; 4] = [&[1], &[3, 1, 2], &[9, 10], &[5, 6, 7, 8]];
    let logged: [Option<u32>; 4] = [None, Some(2), Some(1), Some(42)];
    for list in lists {
        for p in logged {
            let mut profiles = json!({"activeProfiles": list});
            if let Some(p) = p {
                profiles["loggedInProfile"] = json!(p);
            }
            let (_dir, _settings, mgr) = manager_with(json!({ "profiles": profiles }));
            let got = mgr.resolve_logged_in_profile().await.unwrap();
            assert!(list.contains(&got.0));
            if !p.map(|p| list.contains(&p)).unwrap_or(false) {
                assert_eq!(got.0, list[0]);
            }
        }
    }
}

#[tokio::test]
async fn empty_active_list_is_a_configuration_error() {
    let (_dir, _settings, mgr) = manager_with(json!({"profiles": {"activeProfiles": []}}));
    let err = mgr.resolve_logged_in_profile().await.unwrap_err();
    assert!(matches!(err, CoreError::Configuration(_)));
}

#[tokio::test]
async fn mark_for_deletion_rejects_unknown_profile() {
    let (_dir, settings, mgr) = manager_with(json!({"profiles": {"activeProfiles": [1]}}));
    let err = mgr.mark_for_deletion(ProfileId(5)).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidProfile(ProfileId(5))));
    assert_eq!(settings.get(DELETE_PROFILE).await.unwrap(), None);
}

#[tokio::test]
async fn mark_for_deletion_touches_no_files() {
    let (dir, _settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 2], "loggedInProfile": 1}}));
    mgr.ensure_default_layout().await.unwrap();
    mgr.mark_for_deletion(ProfileId(2)).await.unwrap();
    assert_layout(&dir, 2);

    let states: Vec<_> = mgr.profiles().await.unwrap().into_iter().map(|p| (p.id, p.state)).collect();
    assert_eq!(
        states,
        vec![(ProfileId(1), ProfileState::Active), (ProfileId(2), ProfileState::PendingDeletion)]
    );
}

#[tokio::test]
async fn deferred_deletion_of_logged_in_profile() {
    let (dir, settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 2], "loggedInProfile": 2}}));
    mgr.ensure_default_layout().await.unwrap();
    mgr.mark_for_deletion(ProfileId(2)).await.unwrap();

    let removed = mgr.process_deferred_deletion().await.unwrap();
    assert_eq!(removed, Some(ProfileId(2)));
    assert!(!dir.path().join("profiles/2").exists());
    assert_layout(&dir, 1);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
    assert_eq!(settings.get(DELETE_PROFILE).await.unwrap(), None);

    // nothing left to do
    assert_eq!(mgr.process_deferred_deletion().await.unwrap(), None);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
}

#[tokio::test]
async fn deleting_last_profile_clears_logged_in() {
    let (dir, settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1], "loggedInProfile": 1}}));
    mgr.ensure_default_layout().await.unwrap();
    mgr.mark_for_deletion(ProfileId(1)).await.unwrap();
    mgr.process_deferred_deletion().await.unwrap();

    assert!(!dir.path().join("profiles/1").exists());
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), None);
}

#[tokio::test]
async fn deferred_deletion_tolerates_missing_folder() {
    let (_dir, settings, mgr) = manager_with(json!({
        "profiles": {"activeProfiles": [1, 2], "loggedInProfile": 1, "deleteProfile": 2}
    }));
    // folder for 2 was never created
    assert_eq!(mgr.process_deferred_deletion().await.unwrap(), Some(ProfileId(2)));
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn stale_deletion_marker_is_cleared() {
    let (_dir, settings, mgr) = manager_with(json!({
        "profiles": {"activeProfiles": [1], "loggedInProfile": 1, "deleteProfile": 9}
    }));
    assert_eq!(mgr.process_deferred_deletion().await.unwrap(), None);
    assert_eq!(settings.get(DELETE_PROFILE).await.unwrap(), None);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
}

/// Memory store whose next write of the whole profiles record fails.
struct FlakyRecordWrites {
    inner: MemorySettings,
    fail_next: AtomicBool,
}

#[async_trait]
impl SettingsStore for FlakyRecordWrites {
    async fn get(&self, path: &str) -> Result<Option<Value>, CoreError> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), CoreError> {
        if path == PROFILES && self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Storage("disk full".into()));
        }
        self.inner.set(path, value).await
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        self.inner.delete(path).await
    }
}

#[tokio::test]
async fn failed_record_write_keeps_marker_and_retries() {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(FlakyRecordWrites {
        inner: MemorySettings::with_document(json!({
            "profiles": {"activeProfiles": [1, 2], "loggedInProfile": 2}
        })),
        fail_next: AtomicBool::new(false),
    });
    let mgr = ProfileManager::new(settings.clone(), DataAccess::new(dir.path()));
    mgr.ensure_default_layout().await.unwrap();
    mgr.mark_for_deletion(ProfileId(2)).await.unwrap();

    settings.fail_next.store(true, Ordering::SeqCst);
    let err = mgr.process_deferred_deletion().await.unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)), "{err}");
    assert!(!dir.path().join("profiles/2").exists());
    assert_eq!(settings.get(DELETE_PROFILE).await.unwrap(), Some(json!(2)));
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1, 2])));

    // next shutdown: folder already gone, record gets fixed up
    assert_eq!(mgr.process_deferred_deletion().await.unwrap(), Some(ProfileId(2)));
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
    assert_eq!(settings.get(DELETE_PROFILE).await.unwrap(), None);
    assert_layout(&dir, 1);
}

#[tokio::test]
async fn switch_profile_validates_membership() {
    let (_dir, settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 2], "loggedInProfile": 1}}));
    mgr.switch_profile(ProfileId(2)).await.unwrap();
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(2)));

    let err = mgr.switch_profile(ProfileId(3)).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidProfile(ProfileId(3))));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn create_profile_allocates_above_max() {
    let (dir, settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 5, 3], "loggedInProfile": 1}}));
    let p = mgr.create_profile().await.unwrap();
    assert_eq!(p.id, ProfileId(6));
    assert_eq!(p.state, ProfileState::Active);
    assert_layout(&dir, 6);
    assert!(!dir.path().join("profiles/1").exists(), "only the new profile is provisioned");
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1, 5, 3, 6])));
    assert_eq!(settings.get(LOGGED_IN_PROFILE).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn create_profile_refuses_to_wrap_around() {
    let (dir, settings, mgr) = manager_with(json!({
        "profiles": {"activeProfiles": [1, u32::MAX], "loggedInProfile": 1}
    }));
    let err = mgr.create_profile().await.unwrap_err();
    assert!(matches!(err, CoreError::Configuration(_)), "{err}");
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1, u32::MAX])));
    assert!(!dir.path().join("profiles").exists());
}

#[tokio::test]
async fn concurrent_creates_never_share_an_id() {
    let (_dir, settings, mgr) = manager_with(json!({"profiles": {"activeProfiles": [1]}}));
    let mgr = Arc::new(mgr);
    let (a, b, c) = tokio::join!(mgr.create_profile(), mgr.create_profile(), mgr.create_profile());
    let mut ids = vec![a.unwrap().id.0, b.unwrap().id.0, c.unwrap().id.0];
    ids.sort();
    assert_eq!(ids, vec![2, 3, 4]);
    assert_eq!(settings.get(ACTIVE_PROFILES).await.unwrap(), Some(json!([1, 2, 3, 4])));
}

#[tokio::test]
async fn path_in_profile_uses_logged_in_profile() {
    let (dir, _settings, mgr) =
        manager_with(json!({"profiles": {"activeProfiles": [1, 2], "loggedInProfile": 2}}));
    let p = mgr.path_in_profile("/scripts/").await.unwrap();
    assert_eq!(p, dir.path().join("profiles").join("2").join("scripts/"));
}
