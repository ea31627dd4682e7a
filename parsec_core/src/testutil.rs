//! Test utilities for `Store` implementations.
//!
//! Run the shared suite against any `Store`:
//!
//! ```toml
//! [dev-dependencies]
//! parsec_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! ```ignore
//! use parsec_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::store::{Store, StoreError, StoreResult};
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::collections::HashSet;

/// Test suite for `Store` implementations.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Prefix for test paths to avoid conflicts
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}_", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Run all tests.
    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_put_get_bytes().await?;
        self.test_exists().await?;
        self.test_size().await?;
        self.test_delete().await?;
        self.test_missing().await?;
        self.test_partial_read().await?;
        self.test_overwrite().await?;

        if self.store.features().supports_list {
            self.test_list().await?;
            self.cleanup().await?;
        }

        Ok(())
    }

    pub async fn test_put_get_bytes(&self) -> StoreResult<()> {
        let path = self.path("bytes_test");
        let data = random_bytes(4096 + 40);

        self.store.put_bytes(&path, data.clone()).await?;

        let retrieved = self.store.open_read_bytes(&path, 0, None).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");

        Ok(())
    }

    pub async fn test_exists(&self) -> StoreResult<()> {
        let path = self.path("exists_test");

        assert!(
            !self.store.exists(&path).await?,
            "block should not exist before creation"
        );

        self.store
            .put_bytes(&path, Bytes::from_static(b"test"))
            .await?;

        assert!(
            self.store.exists(&path).await?,
            "block should exist after creation"
        );

        Ok(())
    }

    pub async fn test_size(&self) -> StoreResult<()> {
        let path = self.path("size_test");
        self.store
            .put_bytes(&path, Bytes::from(vec![42u8; 12345]))
            .await?;

        assert_eq!(self.store.size(&path).await?, 12345);
        Ok(())
    }

    pub async fn test_delete(&self) -> StoreResult<()> {
        let path = self.path("delete_test");

        self.store
            .put_bytes(&path, Bytes::from_static(b"to be deleted"))
            .await?;
        self.store.delete(&path).await?;

        assert!(
            !self.store.exists(&path).await?,
            "block should not exist after delete"
        );

        Ok(())
    }

    /// Reads and deletes of unknown paths report `NotFound`.
    pub async fn test_missing(&self) -> StoreResult<()> {
        let path = self.path("never_written");

        let read = self.store.open_read_bytes(&path, 0, None).await;
        assert!(
            matches!(read, Err(StoreError::NotFound)),
            "read of missing block should be NotFound"
        );
        let delete = self.store.delete(&path).await;
        assert!(
            matches!(delete, Err(StoreError::NotFound)),
            "delete of missing block should be NotFound"
        );

        Ok(())
    }

    pub async fn test_partial_read(&self) -> StoreResult<()> {
        let path = self.path("partial_test");
        self.store
            .put_bytes(&path, Bytes::from_static(b"0123456789abcdef"))
            .await?;

        let partial = self.store.open_read_bytes(&path, 5, None).await?;
        assert_eq!(partial.as_ref(), b"56789abcdef", "offset read should work");

        let partial = self.store.open_read_bytes(&path, 4, Some(4)).await?;
        assert_eq!(partial.as_ref(), b"4567", "offset + length read should work");

        let past_end = self.store.open_read_bytes(&path, 100, None).await?;
        assert!(past_end.is_empty(), "read past the end should be empty");

        Ok(())
    }

    pub async fn test_overwrite(&self) -> StoreResult<()> {
        let path = self.path("overwrite_test");

        self.store
            .put_bytes(&path, Bytes::from_static(b"original content"))
            .await?;
        self.store
            .put_bytes(&path, Bytes::from_static(b"new content"))
            .await?;

        let retrieved = self.store.open_read_bytes(&path, 0, None).await?;
        assert_eq!(retrieved.as_ref(), b"new content");

        Ok(())
    }

    pub async fn test_list(&self) -> StoreResult<()> {
        let names = ["list_a", "list_b", "list_c"];
        for name in &names {
            self.store
                .put_bytes(&self.path(name), Bytes::from_static(b"list test"))
                .await?;
        }

        let mut stream = self.store.list().await?;
        let mut found: HashSet<String> = HashSet::new();
        while let Some(result) = stream.next().await {
            let path = result.map_err(|e| StoreError::Other(e.into()))?;
            if path.starts_with(&self.prefix) {
                found.insert(path);
            }
        }

        for name in &names {
            let path = self.path(name);
            assert!(found.contains(&path), "list should contain {}", path);
        }

        Ok(())
    }

    pub async fn cleanup(&self) -> StoreResult<()> {
        let mut stream = self.store.list().await?;
        while let Some(result) = stream.next().await {
            let path = result.map_err(|e| StoreError::Other(e.into()))?;
            if path.starts_with(&self.prefix) {
                let _ = self.store.delete(&path).await;
            }
        }
        Ok(())
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}
