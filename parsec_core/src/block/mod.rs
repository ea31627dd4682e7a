//! Block storage: immutable ciphertext blobs addressed by backend ids.

mod multi;
mod store;

pub use multi::{MultiStore, WritePolicy};
pub use store::{BlockStore, DEFAULT_CACHE_CAPACITY};

use crate::{BlockId, store::StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block {0} not found")]
    NotFound(BlockId),
    #[error("block backend unreachable: {0}")]
    Offline(String),
    #[error("block backend error: {0}")]
    Backend(String),
}

impl BlockError {
    pub(crate) fn from_store(id: &BlockId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => BlockError::NotFound(id.clone()),
            StoreError::Offline(msg) => BlockError::Offline(msg),
            other => BlockError::Backend(other.to_string()),
        }
    }
}

pub type BlockResult<T> = Result<T, BlockError>;
