use bytes::Bytes;
use parsec_backend::{BackendConnection, MemoryBackend, connect_in_memory};
use parsec_core::{
    BlockStore, EventKind, Store, StoreError, UserId, VlobApi, VlobError, VlobId,
};
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn vlob_lifecycle_over_the_wire() {
    init_logging();
    let backend = MemoryBackend::new();
    let conn = connect_in_memory(&backend, UserId::new("alice"));

    let created = conn
        .vlob_create(None, Bytes::from_static(b"first"))
        .await
        .unwrap();
    assert!(backend.vlob_exists(&created.id));

    conn.vlob_update(
        &created.id,
        &created.write_trust_seed,
        2,
        Bytes::from_static(b"second"),
    )
    .await
    .unwrap();

    let err = conn
        .vlob_update(&created.id, &created.write_trust_seed, 2, Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, VlobError::BadVersion { current: 2 }));

    let latest = conn
        .vlob_read(&created.id, &created.read_trust_seed, None)
        .await
        .unwrap();
    assert_eq!((latest.version, latest.blob.as_ref()), (2, &b"second"[..]));

    let err = conn
        .vlob_read(&created.id, &created.write_trust_seed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VlobError::TrustSeed(id) if id == created.id));

    let missing = VlobId::new("nope");
    let err = conn
        .vlob_read(&missing, &created.read_trust_seed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VlobError::NotFound(id) if id == missing));
}

#[tokio::test]
async fn user_vlob_over_the_wire() {
    init_logging();
    let backend = MemoryBackend::new();
    let conn = connect_in_memory(&backend, UserId::new("alice"));

    let empty = conn.user_vlob_read(None).await.unwrap();
    assert_eq!(empty.version, 0);
    conn.user_vlob_update(1, Bytes::from_static(b"manifest"))
        .await
        .unwrap();
    assert_eq!(conn.user_vlob_read(Some(1)).await.unwrap().blob, "manifest");
}

#[tokio::test]
async fn blocks_over_the_wire() {
    init_logging();
    let backend = MemoryBackend::new();
    let conn = connect_in_memory(&backend, UserId::new("alice"));
    let blocks = BlockStore::new(conn.clone());

    let id = blocks
        .create(Bytes::from_static(b"ciphertext"), None)
        .await
        .unwrap();
    assert!(backend.blocks().exists(id.as_str()).await.unwrap());

    // A cold facade must go over the wire.
    let cold = BlockStore::new(conn.clone());
    assert_eq!(cold.read(&id).await.unwrap(), "ciphertext");

    cold.delete(&id).await.unwrap();
    assert!(matches!(
        conn.open_read_bytes(id.as_str(), 0, None).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn subscribed_events_are_pushed() {
    init_logging();
    let backend = MemoryBackend::new();
    let alice = connect_in_memory(&backend, UserId::new("alice"));
    let bob = connect_in_memory(&backend, UserId::new("bob"));

    let created = alice.vlob_create(None, Bytes::new()).await.unwrap();
    let mut updates = bob.events().on_vlob_updated();
    bob.subscribe(EventKind::VlobUpdated, created.id.as_str())
        .await
        .unwrap();

    alice
        .vlob_update(&created.id, &created.write_trust_seed, 2, Bytes::new())
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("event should arrive")
        .unwrap();
    assert_eq!(event.id, created.id);
}

#[tokio::test]
async fn offline_backend_and_closed_connection() {
    init_logging();
    let backend = MemoryBackend::new();
    let conn = connect_in_memory(&backend, UserId::new("alice"));

    backend.set_offline(true);
    assert!(matches!(
        conn.user_vlob_read(None).await,
        Err(VlobError::Offline(_))
    ));
    assert!(matches!(
        conn.put_bytes("b", Bytes::new()).await,
        Err(StoreError::Offline(_))
    ));
    backend.set_offline(false);

    let (client_io, server_io) = tokio::io::duplex(1024);
    drop(server_io);
    let dead = BackendConnection::connect(client_io);
    assert!(matches!(
        dead.user_vlob_read(None).await,
        Err(VlobError::Offline(_))
    ));
}
