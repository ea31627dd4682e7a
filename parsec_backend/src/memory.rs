//! In-memory backend holding vlobs, user vlobs and blocks.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parsec_core::{
    EventBus, EventKind, Store, StoreError, StoreFeatures, StoreResult, TrustSeed, UserId,
    VersionedBlob, VlobApi, VlobCreated, VlobError, VlobId, VlobResult, store::PutResponse,
};
use parsec_store_memory::MemoryStore;
use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;

#[derive(Debug)]
struct VlobRecord {
    read_trust_seed: TrustSeed,
    write_trust_seed: TrustSeed,
    /// `versions[i]` holds version `i + 1`.
    versions: Vec<Bytes>,
}

/// Backend state shared by every session.
///
/// Enforces the vlob versioning rules: creation yields version 1 and every
/// update must carry exactly `current + 1`.
#[derive(Debug)]
pub struct MemoryBackend {
    vlobs: RwLock<HashMap<VlobId, VlobRecord>>,
    user_vlobs: RwLock<HashMap<UserId, Vec<Bytes>>>,
    blocks: Arc<dyn Store>,
    events: EventBus,
    offline: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_block_store(Arc::new(MemoryStore::new()))
    }
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_block_store(blocks: Arc<dyn Store>) -> Self {
        Self {
            vlobs: RwLock::default(),
            user_vlobs: RwLock::default(),
            blocks,
            events: EventBus::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Opens a session authenticated as `user`.
    pub fn session(self: &Arc<Self>, user: UserId) -> BackendSession {
        BackendSession {
            backend: self.clone(),
            user,
        }
    }

    /// Simulates a network partition: every call fails with `Offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn vlob_exists(&self, id: &VlobId) -> bool {
        self.read_vlobs().contains_key(id)
    }

    pub fn vlob_version(&self, id: &VlobId) -> Option<u64> {
        self.read_vlobs()
            .get(id)
            .map(|record| record.versions.len() as u64)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn blocks(&self) -> &Arc<dyn Store> {
        &self.blocks
    }

    fn check_online(&self) -> Result<(), String> {
        if self.offline.load(Ordering::SeqCst) {
            Err("backend is offline".to_string())
        } else {
            Ok(())
        }
    }

    // Lock poisoning only follows a panic inside a critical section, none
    // of which can panic, so the inner value is still consistent.
    fn read_vlobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<VlobId, VlobRecord>> {
        self.vlobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_vlobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<VlobId, VlobRecord>> {
        self.vlobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn write_user_vlobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<UserId, Vec<Bytes>>> {
        self.user_vlobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn pick_version(versions: &[Bytes], version: Option<u64>) -> VlobResult<VersionedBlob> {
    let current = versions.len() as u64;
    let version = version.unwrap_or(current);
    if version == 0 || version > current {
        return Err(VlobError::BadVersion { current });
    }
    Ok(VersionedBlob {
        blob: versions[(version - 1) as usize].clone(),
        version,
    })
}

/// A user's authenticated view of a [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct BackendSession {
    backend: Arc<MemoryBackend>,
    user: UserId,
}

impl BackendSession {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    fn online(&self) -> VlobResult<()> {
        self.backend.check_online().map_err(VlobError::Offline)
    }

    fn blocks_online(&self) -> StoreResult<()> {
        self.backend.check_online().map_err(StoreError::Offline)
    }
}

#[async_trait]
impl VlobApi for BackendSession {
    async fn vlob_create(&self, id: Option<VlobId>, blob: Bytes) -> VlobResult<VlobCreated> {
        self.online()?;
        let id = id.unwrap_or_else(VlobId::random);
        let created = VlobCreated {
            id: id.clone(),
            read_trust_seed: TrustSeed::generate(),
            write_trust_seed: TrustSeed::generate(),
        };
        let mut vlobs = self.backend.write_vlobs();
        if vlobs.contains_key(&id) {
            return Err(VlobError::AlreadyExists(id));
        }
        vlobs.insert(
            id.clone(),
            VlobRecord {
                read_trust_seed: created.read_trust_seed.clone(),
                write_trust_seed: created.write_trust_seed.clone(),
                versions: vec![blob],
            },
        );
        debug!(vlob = %id, "vlob created");
        Ok(created)
    }

    async fn vlob_read(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: Option<u64>,
    ) -> VlobResult<VersionedBlob> {
        self.online()?;
        let vlobs = self.backend.read_vlobs();
        let record = vlobs
            .get(id)
            .ok_or_else(|| VlobError::NotFound(id.clone()))?;
        if record.read_trust_seed != *trust_seed {
            return Err(VlobError::TrustSeed(id.clone()));
        }
        pick_version(&record.versions, version)
    }

    async fn vlob_update(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: u64,
        blob: Bytes,
    ) -> VlobResult<()> {
        self.online()?;
        {
            let mut vlobs = self.backend.write_vlobs();
            let record = vlobs
                .get_mut(id)
                .ok_or_else(|| VlobError::NotFound(id.clone()))?;
            if record.write_trust_seed != *trust_seed {
                return Err(VlobError::TrustSeed(id.clone()));
            }
            let current = record.versions.len() as u64;
            if version != current + 1 {
                return Err(VlobError::BadVersion { current });
            }
            record.versions.push(blob);
        }
        debug!(vlob = %id, version, "vlob updated");
        self.backend.events.vlob_updated(id.clone());
        Ok(())
    }

    async fn vlob_delete(&self, id: &VlobId, trust_seed: &TrustSeed) -> VlobResult<()> {
        self.online()?;
        let mut vlobs = self.backend.write_vlobs();
        let record = vlobs
            .get(id)
            .ok_or_else(|| VlobError::NotFound(id.clone()))?;
        if record.write_trust_seed != *trust_seed {
            return Err(VlobError::TrustSeed(id.clone()));
        }
        vlobs.remove(id);
        debug!(vlob = %id, "vlob deleted");
        Ok(())
    }

    async fn user_vlob_read(&self, version: Option<u64>) -> VlobResult<VersionedBlob> {
        self.online()?;
        let user_vlobs = self.backend.user_vlobs.read().unwrap_or_else(|e| e.into_inner());
        let versions = user_vlobs
            .get(&self.user)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if versions.is_empty() && version.unwrap_or(0) == 0 {
            return Ok(VersionedBlob {
                blob: Bytes::new(),
                version: 0,
            });
        }
        pick_version(versions, version)
    }

    async fn user_vlob_update(&self, version: u64, blob: Bytes) -> VlobResult<()> {
        self.online()?;
        {
            let mut user_vlobs = self.backend.write_user_vlobs();
            let versions = user_vlobs.entry(self.user.clone()).or_default();
            let current = versions.len() as u64;
            if version != current + 1 {
                return Err(VlobError::BadVersion { current });
            }
            versions.push(blob);
        }
        debug!(user = %self.user, version, "user vlob updated");
        self.backend.events.user_vlob_updated(self.user.clone());
        Ok(())
    }

    async fn subscribe(&self, _kind: EventKind, _sender: &str) -> VlobResult<()> {
        // In-process sessions observe the backend bus directly.
        self.online()
    }

    fn events(&self) -> &EventBus {
        &self.backend.events
    }
}

#[async_trait]
impl Store for BackendSession {
    fn features(&self) -> StoreFeatures {
        self.backend.blocks.features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.blocks_online()?;
        self.backend.blocks.exists(path).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        self.blocks_online()?;
        self.backend.blocks.put_bytes(path, bytes).await
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        self.blocks_online()?;
        self.backend
            .blocks
            .open_read_bytes(path, offset, max_len)
            .await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        self.blocks_online()?;
        self.backend.blocks.size(path).await
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        self.blocks_online()?;
        self.backend.blocks.list().await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.blocks_online()?;
        self.backend.blocks.delete(path).await
    }
}
