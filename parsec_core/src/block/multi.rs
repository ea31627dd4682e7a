//! Fan-out over several block backends.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, stream};
use std::{collections::BTreeSet, fmt, sync::Arc};
use tracing::{debug, warn};

use crate::store::{PutResponse, Store, StoreError, StoreFeatures, StoreResult};

/// Write policy for multi-backend operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// All backends must succeed.
    All,
    /// At least one backend must succeed.
    #[default]
    Any,
    /// At least N backends must succeed.
    Quorum(usize),
}

/// A `Store` that writes to several backends in parallel and reads from the
/// first one that answers.
///
/// - **Reads**: try each backend in order, first success wins. `NotFound` is
///   reported only if every backend said not found; otherwise the last error
///   is surfaced.
/// - **Writes / deletes**: fan out in parallel, success decided by the
///   [`WritePolicy`]. Deletes count `NotFound` as success. The default
///   policy only fails when every backend failed.
/// - **Exists**: `true` as soon as one backend has the path. An error is
///   reported only if no backend answered.
#[derive(Clone)]
pub struct MultiStore {
    backends: Vec<Arc<dyn Store>>,
    write_policy: WritePolicy,
}

impl fmt::Debug for MultiStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStore")
            .field("backends", &self.backends.len())
            .field("write_policy", &self.write_policy)
            .finish()
    }
}

impl MultiStore {
    pub fn new(backends: Vec<Arc<dyn Store>>) -> Self {
        Self::with_policy(backends, WritePolicy::default())
    }

    pub fn with_policy(backends: Vec<Arc<dyn Store>>, write_policy: WritePolicy) -> Self {
        Self {
            backends,
            write_policy,
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn check_policy(&self, results: Vec<StoreResult<()>>) -> StoreResult<()> {
        let total = results.len();
        let success_count = results.iter().filter(|r| r.is_ok()).count();
        let required = match self.write_policy {
            WritePolicy::All => total,
            WritePolicy::Any => 1.min(total),
            WritePolicy::Quorum(n) => n,
        };
        if success_count >= required {
            return Ok(());
        }
        let last_err = results.into_iter().filter_map(Result::err).last();
        match (self.write_policy, last_err) {
            (WritePolicy::Quorum(n), _) => Err(StoreError::Other(anyhow::anyhow!(
                "quorum not met: {success_count} succeeded, {n} required"
            ))),
            (_, Some(err)) => Err(err),
            (_, None) => Ok(()),
        }
    }
}

#[async_trait]
impl Store for MultiStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_list: self.backends.iter().any(|b| b.features().supports_list),
            case_sensitive: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let mut answered = self.backends.is_empty();
        let mut last_err = None;
        for backend in &self.backends {
            match backend.exists(path).await {
                Ok(true) => return Ok(true),
                Ok(false) => answered = true,
                Err(err) => {
                    debug!("MultiStore exists on backend failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) if !answered => Err(err),
            _ => Ok(false),
        }
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        if self.backends.is_empty() {
            return Ok(());
        }
        let futures: Vec<_> = self
            .backends
            .iter()
            .map(|backend| {
                let backend = backend.clone();
                let bytes = bytes.clone();
                async move { backend.put_bytes(path, bytes).await }
            })
            .collect();
        let results = futures::future::join_all(futures).await;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            warn!(path, "MultiStore write to backend failed: {err}");
        }
        self.check_policy(results)
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        let mut last_err = None;
        for backend in &self.backends {
            match backend.open_read_bytes(path, offset, max_len).await {
                Ok(bytes) => return Ok(bytes),
                Err(StoreError::NotFound) => continue,
                Err(err) => {
                    warn!(path, "MultiStore read from backend failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(StoreError::NotFound))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let mut last_err = None;
        for backend in &self.backends {
            match backend.size(path).await {
                Ok(size) => return Ok(size),
                Err(StoreError::NotFound) => continue,
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(StoreError::NotFound))
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        use futures::StreamExt;

        let mut paths = BTreeSet::new();
        for backend in self.backends.iter().filter(|b| b.features().supports_list) {
            let mut listing = backend.list().await?;
            while let Some(path) = listing.next().await {
                paths.insert(path.map_err(|e| StoreError::Other(e.into()))?);
            }
        }
        let items: Vec<Result<String, std::io::Error>> = paths.into_iter().map(Ok).collect();
        Ok(Box::new(stream::iter(items)))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        if self.backends.is_empty() {
            return Ok(());
        }
        let futures: Vec<_> = self
            .backends
            .iter()
            .map(|backend| {
                let backend = backend.clone();
                async move { backend.delete(path).await }
            })
            .collect();
        let results = futures::future::join_all(futures).await;
        if results
            .iter()
            .all(|r| matches!(r, Err(StoreError::NotFound)))
        {
            return Err(StoreError::NotFound);
        }
        let results = results
            .into_iter()
            .map(|r| match r {
                Err(StoreError::NotFound) => Ok(()),
                other => other,
            })
            .collect();
        self.check_policy(results)
    }
}
