//! # Parsec filesystem core
//!
//! A zero-trust filesystem: the backend stores only ciphertext, addressed
//! by vlob ids and block ids. Everything needed to read a file (vlob id,
//! trust seeds, symmetric key) lives in an encrypted manifest the backend
//! cannot open.
//!
//! ## Layers
//! 1. `manifest`  – CBOR manifests, signed by their author and encrypted.
//! 2. `file`      – file engine: chunked writes, reads, commit with
//!    conflict replay, history, restore and re-encryption.
//! 3. `workspace` – folder tree of the user or of a group, plus dustbin.
//! 4. `actor`     – single task owning all of the above, processing
//!    commands sequentially.
//! 5. `sync`      – debounced background commits and remote change events.
//! 6. `api`       – [`ParsecFs`], the façade applications use, and the
//!    JSON command surface in `commands`.
//! 7. `context`   – wiring (block store, vlob service, identity, clock).

mod actor;
mod api;
pub mod commands;
pub mod config;
mod context;
pub mod debug;
mod error;
pub mod file;
pub mod gc;
pub mod manifest;
pub mod path;
pub mod sync;
pub mod workspace;

pub use api::{DustbinItem, ParsecFs, Stat};
pub use config::FsConfig;
pub use context::{Clock, FsContext, KeyDirectory, LocalIdentity, ManualClock, SystemClock};
pub use error::{FSResult, FsError, PathError};
pub use file::FileStat;
pub use gc::{ManualPurge, PurgeOlderThan, PurgePolicy, PurgeReport};
pub use manifest::{FileManifestAccess, VlobAccess};
pub use path::FsPath;
