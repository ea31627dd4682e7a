use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub type StoreResult<T, E = StoreError> = std::result::Result<T, E>;

/// Raw key/value storage for opaque ciphertext blocks.
///
/// Paths are block ids. Implementations never see plaintext.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    fn features(&self) -> StoreFeatures;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse>;

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes>;

    async fn size(&self, path: &str) -> StoreResult<u64>;

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>;

    async fn delete(&self, path: &str) -> StoreResult<()>;
}

pub type PutResponse = ();

pub struct StoreFeatures {
    /// Whether `list` enumerates stored paths.
    pub supports_list: bool,
    pub case_sensitive: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("backend unreachable: {0}")]
    Offline(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

#[async_trait]
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    fn features(&self) -> StoreFeatures {
        (**self).features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        (**self).exists(path).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        (**self).put_bytes(path, bytes).await
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        (**self).open_read_bytes(path, offset, max_len).await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        (**self).size(path).await
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        (**self).list().await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        (**self).delete(path).await
    }
}
