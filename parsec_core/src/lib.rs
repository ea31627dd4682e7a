//! Core Parsec types and traits.
//!
//! This crate defines what every other Parsec crate shares:
//!
//! - Cryptographic primitives (`crypto`): symmetric encryption, signatures
//!   and sealed boxes
//! - Identifiers (`BlockId`, `VlobId`, `UserId`) and `TrustSeed`
//! - The plaintext `BlockDigest` (SHA-512)
//! - Raw block storage (`Store`), the cached `BlockStore` facade and the
//!   `MultiStore` fan-out
//! - The versioned blob contract (`VlobApi`) and the typed `EventBus`
//!
//! Nothing in here ever sees plaintext except `crypto` itself.

pub mod block;
pub mod crypto;
pub mod digest;
pub mod events;
pub mod ids;
pub mod store;
pub mod vlob;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use block::{BlockError, BlockResult, BlockStore, MultiStore, WritePolicy};
pub use crypto::{CryptoError, PrivateKey, PublicKey, SecretKey, SigningKey, VerifyKey};
pub use digest::BlockDigest;
pub use events::{BackendEvent, EventBus, EventKind};
pub use ids::{BlockId, TrustSeed, UserId, VlobId};
pub use store::{Store, StoreError, StoreFeatures, StoreResult};
pub use vlob::{VersionedBlob, VlobApi, VlobCreated, VlobError, VlobResult};
