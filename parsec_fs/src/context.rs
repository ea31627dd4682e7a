//! Capabilities shared by every layer of the filesystem core.

use parsec_backend::BackendConnection;
use parsec_core::{
    BlockStore, PrivateKey, PublicKey, SigningKey, Store, UserId, VerifyKey, VlobApi,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicI64, Ordering},
    },
};

use crate::{
    config::FsConfig,
    manifest::{AuthorKeys, Timestamp},
};

/// The keys of the user this client acts for.
#[derive(Clone)]
pub struct LocalIdentity {
    user_id: UserId,
    signing_key: SigningKey,
    private_key: PrivateKey,
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl LocalIdentity {
    pub fn new(user_id: UserId, signing_key: SigningKey, private_key: PrivateKey) -> Self {
        Self {
            user_id,
            signing_key,
            private_key,
        }
    }

    pub fn generate(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id.into(), SigningKey::generate(), PrivateKey::generate())
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verify_key(&self) -> VerifyKey {
        self.signing_key.verify_key()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }
}

pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_micros()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, micros: i64) {
        self.0.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

/// Verify keys of every author whose manifests this client accepts.
#[derive(Debug, Clone, Default)]
pub struct KeyDirectory(Arc<RwLock<HashMap<UserId, VerifyKey>>>);

impl KeyDirectory {
    pub fn insert(&self, user: UserId, key: VerifyKey) {
        self.0
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user, key);
    }

    pub fn get(&self, user: &UserId) -> Option<VerifyKey> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user)
            .copied()
    }
}

impl AuthorKeys for KeyDirectory {
    fn verify_key(&self, author: &UserId) -> Option<VerifyKey> {
        self.get(author)
    }
}

/// Everything the file and workspace engines need to reach the outside
/// world: block and vlob services, identity, trusted keys and a clock.
pub struct FsContext {
    pub blocks: BlockStore,
    pub vlobs: Arc<dyn VlobApi>,
    pub identity: LocalIdentity,
    pub keys: KeyDirectory,
    pub clock: Arc<dyn Clock>,
    pub config: FsConfig,
}

impl fmt::Debug for FsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsContext")
            .field("identity", &self.identity)
            .field("blocks", &self.blocks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FsContext {
    /// Builds a context over separate vlob and block services.
    ///
    /// The identity's own verify key is trusted automatically.
    pub fn new(
        identity: LocalIdentity,
        vlobs: Arc<dyn VlobApi>,
        blocks: Arc<dyn Store>,
        config: FsConfig,
    ) -> Self {
        let keys = KeyDirectory::default();
        keys.insert(identity.user_id().clone(), identity.verify_key());
        Self {
            blocks: BlockStore::from_arc(blocks, config.block_cache_capacity),
            vlobs,
            identity,
            keys,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Builds a context using one backend connection for vlobs and blocks.
    pub fn connect(identity: LocalIdentity, connection: BackendConnection, config: FsConfig) -> Self {
        let connection = Arc::new(connection);
        Self::new(identity, connection.clone(), connection, config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_keys(mut self, keys: KeyDirectory) -> Self {
        keys.insert(self.identity.user_id().clone(), self.identity.verify_key());
        self.keys = keys;
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}
