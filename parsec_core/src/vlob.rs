//! Versioned blob (vlob) contract.
//!
//! A vlob is an opaque, encrypted blob with a monotonically increasing
//! version. Reads require the read trust seed, writes the write trust seed.
//! Updates are optimistic: `version` must be exactly `current + 1`.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    TrustSeed, VlobId,
    events::{EventBus, EventKind},
};

#[derive(Debug, Clone)]
pub struct VlobCreated {
    pub id: VlobId,
    pub read_trust_seed: TrustSeed,
    pub write_trust_seed: TrustSeed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub blob: Bytes,
    pub version: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum VlobError {
    #[error("vlob {0} not found")]
    NotFound(VlobId),
    #[error("trust seed rejected for vlob {0}")]
    TrustSeed(VlobId),
    #[error("version conflict, current version is {current}")]
    BadVersion { current: u64 },
    #[error("vlob {0} already exists")]
    AlreadyExists(VlobId),
    #[error("bad parameters: {0}")]
    BadParams(String),
    #[error("backend unreachable: {0}")]
    Offline(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type VlobResult<T> = Result<T, VlobError>;

#[async_trait]
pub trait VlobApi: std::fmt::Debug + Send + Sync + 'static {
    /// Creates a vlob at version 1. With `id == None` the backend picks one.
    async fn vlob_create(&self, id: Option<VlobId>, blob: Bytes) -> VlobResult<VlobCreated>;

    /// Reads `version`, or the latest version when `None`.
    async fn vlob_read(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: Option<u64>,
    ) -> VlobResult<VersionedBlob>;

    async fn vlob_update(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: u64,
        blob: Bytes,
    ) -> VlobResult<()>;

    /// Deletes every version. Requires the write trust seed.
    async fn vlob_delete(&self, id: &VlobId, trust_seed: &TrustSeed) -> VlobResult<()>;

    /// Reads the session user's singleton vlob. A never-written user vlob
    /// reads as version 0 with an empty blob.
    async fn user_vlob_read(&self, version: Option<u64>) -> VlobResult<VersionedBlob>;

    async fn user_vlob_update(&self, version: u64, blob: Bytes) -> VlobResult<()>;

    /// Asks the backend to push `kind` events for `sender`.
    async fn subscribe(&self, kind: EventKind, sender: &str) -> VlobResult<()>;

    /// Local bus on which subscribed events are delivered.
    fn events(&self) -> &EventBus;
}

#[async_trait]
impl<T: VlobApi + ?Sized> VlobApi for std::sync::Arc<T> {
    async fn vlob_create(&self, id: Option<VlobId>, blob: Bytes) -> VlobResult<VlobCreated> {
        (**self).vlob_create(id, blob).await
    }

    async fn vlob_read(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: Option<u64>,
    ) -> VlobResult<VersionedBlob> {
        (**self).vlob_read(id, trust_seed, version).await
    }

    async fn vlob_update(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: u64,
        blob: Bytes,
    ) -> VlobResult<()> {
        (**self).vlob_update(id, trust_seed, version, blob).await
    }

    async fn vlob_delete(&self, id: &VlobId, trust_seed: &TrustSeed) -> VlobResult<()> {
        (**self).vlob_delete(id, trust_seed).await
    }

    async fn user_vlob_read(&self, version: Option<u64>) -> VlobResult<VersionedBlob> {
        (**self).user_vlob_read(version).await
    }

    async fn user_vlob_update(&self, version: u64, blob: Bytes) -> VlobResult<()> {
        (**self).user_vlob_update(version, blob).await
    }

    async fn subscribe(&self, kind: EventKind, sender: &str) -> VlobResult<()> {
        (**self).subscribe(kind, sender).await
    }

    fn events(&self) -> &EventBus {
        (**self).events()
    }
}
