use parsec_backend::{MemoryBackend, connect_in_memory};
use parsec_core::{UserId, VlobId};
use parsec_fs::{
    FsConfig, FsContext, LocalIdentity, ParsecFs, PathError, Stat, FsError, manifest::Entry,
};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context(backend: &Arc<MemoryBackend>, identity: LocalIdentity, config: FsConfig) -> FsContext {
    let session = Arc::new(backend.session(identity.user_id().clone()));
    FsContext::new(identity, session.clone(), session, config)
}

async fn open(backend: &Arc<MemoryBackend>) -> ParsecFs {
    init_logging();
    let ctx = context(backend, LocalIdentity::generate("alice"), FsConfig::default());
    ParsecFs::open(ctx).await.unwrap()
}

async fn file_id(fs: &ParsecFs, name: &str) -> VlobId {
    match fs.tree().await.unwrap().children.get(name) {
        Some(Entry::File(access)) => access.id.clone(),
        other => panic!("{name} is not a file: {other:?}"),
    }
}

#[tokio::test]
async fn create_and_read_empty_file() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    let stat = fs.stat("/a").await.unwrap();
    assert!(stat.is_file());
    assert_eq!(stat.size(), Some(0));
    assert_eq!(stat.version(), Some(1));
    assert!(fs.file_read("/a", 0, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn write_then_read() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"hello"[..]).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, Some(5)).await.unwrap(), &b"hello"[..]);

    let stat = fs.stat("/a").await.unwrap();
    assert_eq!(stat.size(), Some(5));
    assert_eq!(stat.version(), Some(2));
    assert_eq!(backend.vlob_version(&file_id(&fs, "a").await), Some(2));
}

#[tokio::test]
async fn partial_overwrite() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"1234567890"[..]).await.unwrap();
    fs.file_write("/a", 3, &b"ABCD"[..]).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"123ABCD890"[..]);
}

#[tokio::test]
async fn truncate_shrinks_the_file() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"1234567890"[..]).await.unwrap();
    fs.file_truncate("/a", 4).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"1234"[..]);
    assert_eq!(fs.stat("/a").await.unwrap().size(), Some(4));

    // Growing through truncate does nothing.
    fs.file_truncate("/a", 100).await.unwrap();
    assert_eq!(fs.stat("/a").await.unwrap().version(), Some(3));
}

#[tokio::test]
async fn move_and_list() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/v1").await.unwrap();
    fs.move_entry("/v1", "/v2").await.unwrap();
    assert_eq!(fs.stat("/").await.unwrap().children(), ["v2".to_string()]);

    let err = fs.file_read("/v1", 0, None).await.unwrap_err();
    assert!(matches!(err, FsError::Path(PathError::NotFound(_))));
}

#[tokio::test]
async fn delete_and_undelete() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"payload"[..]).await.unwrap();
    fs.delete("/a").await.unwrap();
    assert!(fs.stat("/").await.unwrap().children().is_empty());

    let dustbin = fs.dustbin().await.unwrap();
    assert_eq!(dustbin.len(), 1);
    assert_eq!(dustbin[0].path, "/a");

    let path = fs.undelete(&dustbin[0].id).await.unwrap();
    assert_eq!(path.to_string(), "/a");
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"payload"[..]);
    assert!(fs.dustbin().await.unwrap().is_empty());
}

#[tokio::test]
async fn cross_block_write() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, vec![0u8; 10_000]).await.unwrap();
    let slice = fs.file_read("/a", 4090, Some(20)).await.unwrap();
    assert_eq!(slice, vec![0u8; 20]);
    assert_eq!(fs.stat("/a").await.unwrap().size(), Some(10_000));
}

#[tokio::test]
async fn write_past_end_pads_with_zeros() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"ab"[..]).await.unwrap();
    fs.file_write("/a", 5, &b"z"[..]).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"ab\0\0\0z"[..]);
    assert!(fs.file_read("/a", 100, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn folders_and_recursive_delete() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.folder_create("/docs").await.unwrap();
    fs.folder_create("/docs/old").await.unwrap();
    fs.file_create("/docs/report").await.unwrap();
    fs.file_create("/docs/old/draft").await.unwrap();
    fs.file_write("/docs/old/draft", 0, &b"v0"[..]).await.unwrap();

    match fs.stat("/docs").await.unwrap() {
        Stat::Folder { children, .. } => assert_eq!(children, ["old", "report"]),
        other => panic!("unexpected stat {other:?}"),
    }

    let err = fs.file_create("/missing/file").await.unwrap_err();
    assert!(err.is_path_not_found());
    let err = fs.file_create("/docs/report/child").await.unwrap_err();
    assert_eq!(err.status(), "path_not_a_folder");

    fs.delete("/docs").await.unwrap();
    let mut paths: Vec<_> = fs
        .dustbin()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.path)
        .collect();
    paths.sort();
    assert_eq!(paths, ["/docs/old/draft", "/docs/report"]);

    let draft = fs
        .dustbin()
        .await
        .unwrap()
        .into_iter()
        .find(|item| item.path == "/docs/old/draft")
        .unwrap();
    fs.undelete(&draft.id).await.unwrap();
    assert_eq!(
        fs.file_read("/docs/old/draft", 0, None).await.unwrap(),
        &b"v0"[..]
    );
    assert_eq!(fs.stat("/docs").await.unwrap().children(), ["old".to_string()]);
}

#[tokio::test]
async fn moving_a_folder_into_itself_is_rejected() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.folder_create("/a").await.unwrap();
    fs.folder_create("/a/b").await.unwrap();
    assert!(fs.move_entry("/a", "/a/b/c").await.is_err());
    assert!(fs.move_entry("/", "/x").await.is_err());

    fs.file_create("/f").await.unwrap();
    let err = fs.move_entry("/f", "/a").await.unwrap_err();
    assert_eq!(err.status(), "path_already_exists");
    fs.move_entry("/f", "/a/b/f").await.unwrap();
    assert!(fs.stat("/a/b/f").await.unwrap().is_file());
}

#[tokio::test]
async fn history_and_restore() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"one"[..]).await.unwrap();
    fs.file_write("/a", 3, &b" two"[..]).await.unwrap();

    let sizes: Vec<u64> = fs
        .history("/a", 1, None)
        .await
        .unwrap()
        .iter()
        .map(|stat| stat.size)
        .collect();
    assert_eq!(sizes, [0, 3, 7]);

    fs.restore("/a", Some(2)).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"one"[..]);
    assert_eq!(fs.stat("/a").await.unwrap().version(), Some(4));

    // The default is the version before the latest.
    fs.restore("/a", None).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"one two"[..]);

    let err = fs.restore("/a", Some(9)).await.unwrap_err();
    assert_eq!(err.status(), "bad_version");
    let err = fs.history("/a", 3, Some(2)).await.unwrap_err();
    assert_eq!(err.status(), "bad_params");
}

#[tokio::test]
async fn reencrypt_keeps_content_and_drops_old_vlob() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;

    fs.file_create("/secret").await.unwrap();
    fs.file_write("/secret", 0, &b"classified"[..]).await.unwrap();
    let old = file_id(&fs, "secret").await;

    let access = fs.reencrypt("/secret").await.unwrap();
    assert_ne!(access.id, old);
    assert_eq!(file_id(&fs, "secret").await, access.id);
    assert!(!backend.vlob_exists(&old));
    assert_eq!(
        fs.file_read("/secret", 0, None).await.unwrap(),
        &b"classified"[..]
    );
    assert_eq!(fs.stat("/secret").await.unwrap().version(), Some(1));
}

#[tokio::test]
async fn state_survives_reopen() {
    let backend = MemoryBackend::new();
    let identity = LocalIdentity::generate("alice");

    let fs = ParsecFs::open(context(&backend, identity.clone(), FsConfig::default()))
        .await
        .unwrap();
    fs.folder_create("/dir").await.unwrap();
    fs.file_create("/dir/file").await.unwrap();
    fs.file_write("/dir/file", 0, &b"persisted"[..]).await.unwrap();
    fs.shutdown().await.unwrap();
    assert!(fs.stat("/").await.is_err());

    let reopened = ParsecFs::open(context(&backend, identity, FsConfig::default()))
        .await
        .unwrap();
    assert_eq!(
        reopened.file_read("/dir/file", 0, None).await.unwrap(),
        &b"persisted"[..]
    );
}

#[tokio::test]
async fn another_user_cannot_read_the_tree() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;
    fs.file_create("/a").await.unwrap();

    // Same user id, different keys: the manifest does not open.
    let impostor = context(&backend, LocalIdentity::generate("alice"), FsConfig::default());
    assert!(ParsecFs::open(impostor).await.is_err());
}

#[tokio::test]
async fn works_over_the_wire_protocol() {
    init_logging();
    let backend = MemoryBackend::new();
    let connection = connect_in_memory(&backend, UserId::new("alice"));
    let ctx = FsContext::connect(
        LocalIdentity::generate("alice"),
        connection,
        FsConfig::default(),
    );
    let fs = ParsecFs::open(ctx).await.unwrap();

    fs.file_create("/a").await.unwrap();
    fs.file_write("/a", 0, &b"over the wire"[..]).await.unwrap();
    fs.file_write("/a", 5, &b"THE"[..]).await.unwrap();
    assert_eq!(
        fs.file_read("/a", 0, None).await.unwrap(),
        &b"over THE wire"[..]
    );
    assert_eq!(fs.stat("/a").await.unwrap().version(), Some(3));
}

#[tokio::test]
async fn offline_backend_is_reported() {
    let backend = MemoryBackend::new();
    let fs = open(&backend).await;
    fs.file_create("/a").await.unwrap();

    backend.set_offline(true);
    let err = fs.file_write("/a", 0, &b"x"[..]).await.unwrap_err();
    assert!(err.is_offline(), "{err}");
    assert_eq!(err.status(), "backend_offline");

    backend.set_offline(false);
    fs.file_write("/a", 0, &b"x"[..]).await.unwrap();
    assert_eq!(fs.file_read("/a", 0, None).await.unwrap(), &b"x"[..]);
}
