use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, stream};
use parsec_core::{
    BlockError, BlockId, BlockStore, MultiStore, Store, StoreError, StoreFeatures, StoreResult,
    WritePolicy, store::PutResponse, testutil::StoreTests,
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Map-backed store that counts reads and can be switched offline.
#[derive(Debug, Default)]
struct CountingStore {
    files: Mutex<HashMap<String, Bytes>>,
    reads: AtomicUsize,
    offline: AtomicBool,
}

impl CountingStore {
    fn check(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Offline("switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for CountingStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_list: true,
            case_sensitive: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        self.check()?;
        self.files.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        let file = files.get(path).ok_or(StoreError::NotFound)?;
        let start = (offset as usize).min(file.len());
        let end = match max_len {
            Some(max) => (start + max as usize).min(file.len()),
            None => file.len(),
        };
        Ok(file.slice(start..end))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        self.check()?;
        let files = self.files.lock().unwrap();
        Ok(files.get(path).ok_or(StoreError::NotFound)?.len() as u64)
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        self.check()?;
        let keys: Vec<_> = self.files.lock().unwrap().keys().cloned().map(Ok).collect();
        Ok(Box::new(stream::iter(keys)))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.check()?;
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .ok_or(StoreError::NotFound)?;
        Ok(())
    }
}

#[tokio::test]
async fn counting_store_passes_store_suite() {
    let store = CountingStore::default();
    StoreTests::new(&store).run_all().await.unwrap();
}

#[tokio::test]
async fn block_store_serves_reads_from_cache() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(CountingStore::default());
    let blocks = BlockStore::from_arc(backend.clone(), 16);

    let id = blocks
        .create(Bytes::from_static(b"ciphertext"), None)
        .await
        .unwrap();
    assert_eq!(blocks.read(&id).await.unwrap(), "ciphertext");
    assert_eq!(blocks.read(&id).await.unwrap(), "ciphertext");
    assert_eq!(backend.reads.load(Ordering::SeqCst), 0);

    // A second facade over the same backend has its own cache.
    let cold = BlockStore::from_arc(backend.clone(), 16);
    assert_eq!(cold.read(&id).await.unwrap(), "ciphertext");
    assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn block_store_delete_is_idempotent() {
    let backend = Arc::new(CountingStore::default());
    let blocks = BlockStore::from_arc(backend, 16);

    let id = blocks
        .create(Bytes::from_static(b"x"), Some(BlockId::new("fixed")))
        .await
        .unwrap();
    assert_eq!(id, BlockId::new("fixed"));
    blocks.delete(&id).await.unwrap();
    blocks.delete(&id).await.unwrap();

    assert!(matches!(
        blocks.read(&id).await,
        Err(BlockError::NotFound(missing)) if missing == id
    ));
}

#[tokio::test]
async fn multi_store_reads_first_success_and_respects_policy() {
    let _ = env_logger::builder().is_test(true).try_init();
    let a = Arc::new(CountingStore::default());
    let b = Arc::new(CountingStore::default());
    let backends: Vec<Arc<dyn Store>> = vec![a.clone(), b.clone()];

    let any = MultiStore::new(backends.clone());
    a.offline.store(true, Ordering::SeqCst);
    any.put_bytes("blk", Bytes::from_static(b"data")).await.unwrap();
    assert_eq!(any.open_read_bytes("blk", 0, None).await.unwrap(), "data");
    assert!(any.exists("blk").await.unwrap());
    assert!(!any.exists("nope").await.unwrap());

    let all = MultiStore::with_policy(backends.clone(), WritePolicy::All);
    assert!(matches!(
        all.put_bytes("blk2", Bytes::from_static(b"data")).await,
        Err(StoreError::Offline(_))
    ));

    let quorum = MultiStore::with_policy(backends, WritePolicy::Quorum(2));
    assert!(quorum.put_bytes("blk3", Bytes::new()).await.is_err());

    a.offline.store(false, Ordering::SeqCst);
    assert!(matches!(
        any.open_read_bytes("missing", 0, None).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn multi_store_fails_only_when_every_backend_fails() {
    let a = Arc::new(CountingStore::default());
    let b = Arc::new(CountingStore::default());
    let backends: Vec<Arc<dyn Store>> = vec![a.clone(), b.clone()];
    let multi = MultiStore::new(backends);

    a.offline.store(true, Ordering::SeqCst);
    multi.put_bytes("blk", Bytes::from_static(b"data")).await.unwrap();
    multi.delete("blk").await.unwrap();
    assert!(!multi.exists("blk").await.unwrap());

    b.offline.store(true, Ordering::SeqCst);
    assert!(matches!(
        multi.put_bytes("blk", Bytes::new()).await,
        Err(StoreError::Offline(_))
    ));
    assert!(matches!(
        multi.exists("blk").await,
        Err(StoreError::Offline(_))
    ));
}

#[tokio::test]
async fn multi_store_passes_store_suite() {
    let backends: Vec<Arc<dyn Store>> = vec![
        Arc::new(CountingStore::default()),
        Arc::new(CountingStore::default()),
    ];
    let multi = MultiStore::new(backends);
    StoreTests::new(&multi).run_all().await.unwrap();
}
