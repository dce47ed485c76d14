use cairn_core::{
    ArchiveRequest, Archiver, BackupOutcome, BackupReason, BackupScheduler, DataAccess, Notifier,
    ProfileManager,
};
use cairn_json::{JsonSettingsStore, ZipArchiver};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use zip::ZipArchive;

fn entry_names(archive: &Path) -> BTreeSet<String> {
    let zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    zip.file_names().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn zips_sources_relative_to_base() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("data");
    std::fs::create_dir_all(base.join("profiles/1/scripts")).unwrap();
    std::fs::write(base.join("profiles/1/hotkeys.json"), "{}").unwrap();
    std::fs::write(base.join("profiles/1/scripts/hello.js"), "console.log(1)").unwrap();
    std::fs::write(base.join("global-settings.json"), "{}").unwrap();

    let dest = base.join("backups/out.zip");
    ZipArchiver
        .archive(&ArchiveRequest {
            base: base.clone(),
            sources: vec![base.join("profiles/1"), base.join("global-settings.json")],
            dest: dest.clone(),
        })
        .await
        .unwrap();

    let names = entry_names(&dest);
    let expected: BTreeSet<String> = [
        "profiles/1/",
        "profiles/1/scripts/",
        "profiles/1/hotkeys.json",
        "profiles/1/scripts/hello.js",
        "global-settings.json",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(names, expected);

    let mut zip = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
    let mut script = String::new();
    std::io::Read::read_to_string(&mut zip.by_name("profiles/1/scripts/hello.js").unwrap(), &mut script).unwrap();
    assert_eq!(script, "console.log(1)");
}

#[tokio::test]
async fn missing_source_fails_without_leaving_a_file() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("backups/out.zip");
    let err = ZipArchiver
        .archive(&ArchiveRequest {
            base: dir.path().to_path_buf(),
            sources: vec![dir.path().join("nope")],
            dest: dest.clone(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nope"), "{err}");
    assert!(!dest.exists());
}

#[tokio::test]
async fn scheduled_backup_end_to_end() {
    let dir = TempDir::new().unwrap();
    let data = DataAccess::new(dir.path());
    let store = Arc::new(JsonSettingsStore::open(data.global_settings_file()).await.unwrap());
    let profiles = Arc::new(ProfileManager::new(store, data));
    profiles.ensure_default_layout().await.unwrap();

    let scheduler = BackupScheduler::new(profiles, Arc::new(ZipArchiver), Notifier::new())
        .with_app_version("9.9.9")
        .with_max_backups(1);

    let first = scheduler.start_backup(BackupReason::Scheduled).await;
    let BackupOutcome::Completed(first) = first else {
        panic!("backup failed: {first:?}");
    };
    let names = entry_names(&first.archive_path);
    assert!(names.contains("profiles/1/hotkeys.json"), "{names:?}");
    assert!(names.contains("profiles/1/live-events/"), "{names:?}");
    assert!(names.contains("global-settings.json"), "{names:?}");
    assert!(!names.iter().any(|n| n.starts_with("backups/")));

    let manual = scheduler.start_backup(BackupReason::Manual).await;
    assert!(manual.is_completed());
    std::thread::sleep(std::time::Duration::from_millis(50));
    let second = scheduler.start_backup(BackupReason::OnExit).await;
    assert!(second.is_completed());

    // one automatic archive kept, the manual one is never pruned
    let mut left: Vec<String> = std::fs::read_dir(dir.path().join("backups"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    left.sort();
    assert_eq!(left.len(), 2, "{left:?}");
    assert!(left.iter().any(|n| n.contains("_manual_")));
    assert!(left.iter().any(|n| n.contains("_on-exit_")));
}
