use parsec_backend::MemoryBackend;
use parsec_core::{UserId, VlobApi, VlobId};
use parsec_fs::{FsConfig, FsContext, LocalIdentity, ParsecFs, manifest::Entry};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

fn auto_sync() -> FsConfig {
    FsConfig {
        auto_sync: true,
        sync_min_wait_ms: 1_000,
        sync_max_wait_ms: 10_000,
        backend_offline_wait_ms: 5_000,
        ..FsConfig::default()
    }
}

async fn open(backend: &Arc<MemoryBackend>, identity: LocalIdentity, config: FsConfig) -> ParsecFs {
    let _ = env_logger::builder().is_test(true).try_init();
    let session = Arc::new(backend.session(identity.user_id().clone()));
    ParsecFs::open(FsContext::new(identity, session.clone(), session, config))
        .await
        .unwrap()
}

async fn file_id(fs: &ParsecFs, name: &str) -> VlobId {
    match fs.tree().await.unwrap().children.get(name) {
        Some(Entry::File(access)) => access.id.clone(),
        other => panic!("{name} is not a file: {other:?}"),
    }
}

async fn user_version(backend: &Arc<MemoryBackend>) -> u64 {
    backend
        .session(UserId::new("alice"))
        .user_vlob_read(None)
        .await
        .unwrap()
        .version
}

#[tokio::test(start_paused = true)]
async fn commits_after_a_quiet_period() {
    let backend = MemoryBackend::new();
    let fs = open(&backend, LocalIdentity::generate("alice"), auto_sync()).await;

    fs.file_create("/a").await.unwrap();
    let id = file_id(&fs, "a").await;
    assert_eq!(user_version(&backend).await, 0);
    fs.synchronize().await.unwrap();
    assert_eq!(user_version(&backend).await, 1);

    fs.file_write("/a", 0, &b"draft"[..]).await.unwrap();
    sleep(Duration::from_millis(600)).await;
    fs.file_write("/a", 5, &b" two"[..]).await.unwrap();
    assert_eq!(backend.vlob_version(&id), Some(1));
    // Uncommitted changes are visible locally.
    assert_eq!(fs.stat("/a").await.unwrap().version(), Some(2));

    sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.vlob_version(&id), Some(1));

    sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.vlob_version(&id), Some(2));
    // File content changes leave the tree alone.
    assert_eq!(user_version(&backend).await, 1);
}

#[tokio::test(start_paused = true)]
async fn continuous_edits_are_committed_after_max_wait() {
    let backend = MemoryBackend::new();
    let fs = open(&backend, LocalIdentity::generate("alice"), auto_sync()).await;

    fs.file_create("/log").await.unwrap();
    fs.synchronize().await.unwrap();
    let id = file_id(&fs, "log").await;

    for i in 0..19u64 {
        fs.file_write("/log", i, &b"x"[..]).await.unwrap();
        sleep(Duration::from_millis(500)).await;
    }
    // 9.5 s of edits, never quiet for a full second.
    assert_eq!(backend.vlob_version(&id), Some(1));

    fs.file_write("/log", 19, &b"x"[..]).await.unwrap();
    sleep(Duration::from_millis(700)).await;
    assert_eq!(backend.vlob_version(&id), Some(2));
}

#[tokio::test(start_paused = true)]
async fn synchronize_commits_immediately() {
    let backend = MemoryBackend::new();
    let fs = open(&backend, LocalIdentity::generate("alice"), auto_sync()).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"now"[..]).await.unwrap();
    fs.synchronize().await.unwrap();

    let id = file_id(&fs, "a").await;
    assert_eq!(backend.vlob_version(&id), Some(2));
    assert_eq!(user_version(&backend).await, 1);

    // Nothing left for the synchronizer to do.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.vlob_version(&id), Some(2));
    assert_eq!(user_version(&backend).await, 1);
}

#[tokio::test(start_paused = true)]
async fn retries_after_the_backend_comes_back() {
    let backend = MemoryBackend::new();
    let fs = open(&backend, LocalIdentity::generate("alice"), auto_sync()).await;

    fs.file_create("/a").await.unwrap();
    fs.synchronize().await.unwrap();
    let id = file_id(&fs, "a").await;

    fs.file_write("/a", 0, &b"pending"[..]).await.unwrap();
    backend.set_offline(true);
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(backend.vlob_version(&id), Some(1));

    backend.set_offline(false);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.vlob_version(&id), Some(1), "waits out the offline delay");

    sleep(Duration::from_secs(4)).await;
    assert_eq!(backend.vlob_version(&id), Some(2));
}

#[tokio::test(start_paused = true)]
async fn deleted_paths_leave_the_journal() {
    let backend = MemoryBackend::new();
    let fs = open(&backend, LocalIdentity::generate("alice"), auto_sync()).await;

    fs.folder_create("/tmp").await.unwrap();
    fs.file_create("/tmp/scratch").await.unwrap();
    fs.file_write("/tmp/scratch", 0, &b"junk"[..]).await.unwrap();
    fs.synchronize().await.unwrap();

    fs.file_write("/tmp/scratch", 0, &b"more"[..]).await.unwrap();
    fs.delete("/tmp").await.unwrap();
    sleep(Duration::from_secs(3)).await;

    assert!(fs.stat("/").await.unwrap().children().is_empty());
    assert_eq!(fs.dustbin().await.unwrap().len(), 1);
    assert_eq!(user_version(&backend).await, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_commits_pending_changes() {
    let backend = MemoryBackend::new();
    let identity = LocalIdentity::generate("alice");
    let config = FsConfig {
        sync_min_wait_ms: 60_000,
        sync_max_wait_ms: 120_000,
        ..auto_sync()
    };
    let fs = open(&backend, identity.clone(), config.clone()).await;

    fs.file_create("/late").await.unwrap();
    fs.file_write("/late", 0, &b"saved on exit"[..]).await.unwrap();
    fs.shutdown().await.unwrap();

    let reopened = open(&backend, identity, config).await;
    assert_eq!(
        reopened.file_read("/late", 0, None).await.unwrap(),
        &b"saved on exit"[..]
    );
}

#[tokio::test(start_paused = true)]
async fn reencrypted_vlob_outlives_the_unsaved_tree() {
    let backend = MemoryBackend::new();
    let fs = open(&backend, LocalIdentity::generate("alice"), auto_sync()).await;

    fs.file_create("/a").await.unwrap();
    fs.synchronize().await.unwrap();
    let old = file_id(&fs, "a").await;

    let new = fs.reencrypt("/a").await.unwrap();
    assert!(backend.vlob_exists(&old));
    assert!(backend.vlob_exists(&new.id));

    sleep(Duration::from_millis(1_500)).await;
    assert!(!backend.vlob_exists(&old));
    assert_eq!(user_version(&backend).await, 2);
}
