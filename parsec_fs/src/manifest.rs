//! Manifest types and their signed, encrypted encoding.
//!
//! Manifests are CBOR (minicbor). Before leaving the client every manifest
//! is wrapped in a [`SignedEnvelope`] (author + Ed25519 signature over the
//! CBOR payload) and the envelope is encrypted: with the vlob's
//! [`SecretKey`] for file and group manifests, or sealed to the user's own
//! public key for the user manifest. Readers verify the signature against
//! the author's known key before trusting anything inside.

use bytes::Bytes;
use minicbor::{Decode, Encode};
use parsec_core::{
    BlockDigest, BlockId, CryptoError, SecretKey, TrustSeed, UserId, VerifyKey, VlobId,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    convert::Infallible,
    fmt,
};

use crate::context::FsContext;

/// Microseconds since the Unix epoch.
pub type Timestamp = i64;

const FILE_MAGIC: &str = "parsec/file/1";
const USER_MAGIC: &str = "parsec/user/1";
const GROUP_MAGIC: &str = "parsec/group/1";
const ENVELOPE_MAGIC: &str = "parsec/signed/1";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest decoding failed: {0}")]
    Decode(String),
    #[error("manifest encoding failed: {0}")]
    Encode(String),
    #[error("manifest schema violation: {0}")]
    Schema(String),
    #[error("no verify key known for author {0}")]
    UnknownAuthor(UserId),
    #[error("bad manifest signature from {0}")]
    BadSignature(UserId),
    #[error("block {0} failed integrity check")]
    Integrity(BlockId),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<minicbor::decode::Error> for ManifestError {
    fn from(err: minicbor::decode::Error) -> Self {
        ManifestError::Decode(err.to_string())
    }
}

impl From<minicbor::encode::Error<Infallible>> for ManifestError {
    fn from(err: minicbor::encode::Error<Infallible>) -> Self {
        ManifestError::Encode(err.to_string())
    }
}

/// Where one block lives and how to check it after decryption.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct BlockAccess {
    #[n(0)]
    pub id: BlockId,
    #[n(1)]
    pub digest: BlockDigest,
    #[n(2)]
    pub size: u64,
}

/// Consecutive blocks encrypted with the same key.
#[derive(Encode, Decode, Clone, PartialEq, Eq)]
#[cbor(map)]
pub struct BlockRun {
    #[n(0)]
    key: SecretKey,
    #[n(1)]
    pub blocks: Vec<BlockAccess>,
}

impl fmt::Debug for BlockRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRun")
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}

impl BlockRun {
    pub fn new(key: &SecretKey, blocks: Vec<BlockAccess>) -> Self {
        Self {
            key: key.clone(),
            blocks,
        }
    }

    pub fn key(&self) -> SecretKey {
        self.key.clone()
    }

    pub fn has_key(&self, key: &SecretKey) -> bool {
        &self.key == key
    }

    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }
}

/// Appends `block` to `runs`, extending the last run when it shares `key`.
pub(crate) fn push_block(runs: &mut Vec<BlockRun>, key: &SecretKey, block: BlockAccess) {
    match runs.last_mut() {
        Some(last) if last.has_key(key) => last.blocks.push(block),
        _ => runs.push(BlockRun::new(key, vec![block])),
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(array)]
pub struct FileManifest {
    #[n(0)]
    magic: String,
    #[n(1)]
    pub created: Timestamp,
    #[n(2)]
    pub updated: Timestamp,
    /// Fixed for the lifetime of the manifest.
    #[n(3)]
    pub block_size: u64,
    #[n(4)]
    pub runs: Vec<BlockRun>,
}

impl FileManifest {
    pub fn new(now: Timestamp, block_size: u64, runs: Vec<BlockRun>) -> Self {
        Self {
            magic: FILE_MAGIC.to_string(),
            created: now,
            updated: now,
            block_size,
            runs,
        }
    }

    pub fn size(&self) -> u64 {
        self.runs.iter().map(BlockRun::size).sum()
    }

    pub fn block_ids(&self) -> BTreeSet<BlockId> {
        self.runs
            .iter()
            .flat_map(|run| run.blocks.iter().map(|b| b.id.clone()))
            .collect()
    }
}

/// Everything needed to read and write one vlob.
#[derive(Encode, Decode, Clone, PartialEq, Eq)]
#[cbor(map)]
pub struct VlobAccess {
    #[n(0)]
    pub id: VlobId,
    #[n(1)]
    pub read_trust_seed: TrustSeed,
    #[n(2)]
    pub write_trust_seed: TrustSeed,
    #[n(3)]
    key: SecretKey,
}

impl fmt::Debug for VlobAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlobAccess")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl VlobAccess {
    pub fn new(
        id: VlobId,
        read_trust_seed: TrustSeed,
        write_trust_seed: TrustSeed,
        key: &SecretKey,
    ) -> Self {
        Self {
            id,
            read_trust_seed,
            write_trust_seed,
            key: key.clone(),
        }
    }

    pub fn key(&self) -> SecretKey {
        self.key.clone()
    }
}

pub type FileManifestAccess = VlobAccess;

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    #[n(0)]
    File(#[n(0)] FileManifestAccess),
    #[n(1)]
    Folder(#[n(0)] FolderEntry),
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct FolderEntry {
    #[n(0)]
    pub created: Timestamp,
    #[n(1)]
    pub updated: Timestamp,
    #[n(2)]
    pub children: BTreeMap<String, Entry>,
}

impl FolderEntry {
    pub fn new(now: Timestamp) -> Self {
        Self {
            created: now,
            updated: now,
            children: BTreeMap::new(),
        }
    }

    fn validate(&self, at: &str) -> Result<(), ManifestError> {
        for (name, child) in &self.children {
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(ManifestError::Schema(format!(
                    "invalid entry name {name:?} in {at}"
                )));
            }
            if let Entry::Folder(folder) = child {
                folder.validate(&format!("{at}/{name}"))?;
            }
        }
        Ok(())
    }

    /// Every file below this folder, with its path relative to it.
    pub fn files(&self) -> Vec<(Vec<String>, &FileManifestAccess)> {
        let mut out = Vec::new();
        collect_files(self, &mut Vec::new(), &mut out);
        out
    }
}

fn collect_files<'a>(
    folder: &'a FolderEntry,
    prefix: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, &'a FileManifestAccess)>,
) {
    for (name, child) in &folder.children {
        prefix.push(name.clone());
        match child {
            Entry::File(access) => out.push((prefix.clone(), access)),
            Entry::Folder(sub) => collect_files(sub, prefix, out),
        }
        prefix.pop();
    }
}

/// A deleted file waiting to be restored or purged.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct DustbinEntry {
    #[n(0)]
    pub path: String,
    #[n(1)]
    pub removed_at: Timestamp,
    #[n(2)]
    pub access: FileManifestAccess,
}

impl DustbinEntry {
    pub fn id(&self) -> &VlobId {
        &self.access.id
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(array)]
pub struct UserManifest {
    #[n(0)]
    magic: String,
    #[n(1)]
    pub root: FolderEntry,
    #[n(2)]
    pub dustbin: Vec<DustbinEntry>,
    #[n(3)]
    pub groups: BTreeMap<String, VlobAccess>,
}

impl UserManifest {
    pub fn new(now: Timestamp) -> Self {
        Self {
            magic: USER_MAGIC.to_string(),
            root: FolderEntry::new(now),
            dustbin: Vec::new(),
            groups: BTreeMap::new(),
        }
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(array)]
pub struct GroupManifest {
    #[n(0)]
    magic: String,
    #[n(1)]
    pub root: FolderEntry,
    #[n(2)]
    pub dustbin: Vec<DustbinEntry>,
}

impl GroupManifest {
    pub fn new(now: Timestamp) -> Self {
        Self {
            magic: GROUP_MAGIC.to_string(),
            root: FolderEntry::new(now),
            dustbin: Vec::new(),
        }
    }
}

/// Schema checks run on every decoded manifest.
pub trait Manifest: Encode<()> + for<'b> Decode<'b, ()> {
    fn validate(&self) -> Result<(), ManifestError>;
}

fn check_magic(found: &str, expected: &str) -> Result<(), ManifestError> {
    if found != expected {
        return Err(ManifestError::Schema(format!(
            "expected {expected} manifest, found {found:?}"
        )));
    }
    Ok(())
}

impl Manifest for FileManifest {
    fn validate(&self) -> Result<(), ManifestError> {
        check_magic(&self.magic, FILE_MAGIC)?;
        if self.block_size == 0 {
            return Err(ManifestError::Schema("block_size must be positive".into()));
        }
        if self.runs.iter().all(|run| run.blocks.is_empty()) {
            return Err(ManifestError::Schema("file manifest has no blocks".into()));
        }
        for block in self.runs.iter().flat_map(|run| &run.blocks) {
            if block.size > self.block_size {
                return Err(ManifestError::Schema(format!(
                    "block {} is larger than block_size",
                    block.id
                )));
            }
        }
        Ok(())
    }
}

fn validate_dustbin(dustbin: &[DustbinEntry]) -> Result<(), ManifestError> {
    for entry in dustbin {
        if !entry.path.starts_with('/') {
            return Err(ManifestError::Schema(format!(
                "dustbin path {:?} is not absolute",
                entry.path
            )));
        }
    }
    Ok(())
}

impl Manifest for UserManifest {
    fn validate(&self) -> Result<(), ManifestError> {
        check_magic(&self.magic, USER_MAGIC)?;
        self.root.validate("")?;
        validate_dustbin(&self.dustbin)
    }
}

impl Manifest for GroupManifest {
    fn validate(&self) -> Result<(), ManifestError> {
        check_magic(&self.magic, GROUP_MAGIC)?;
        self.root.validate("")?;
        validate_dustbin(&self.dustbin)
    }
}

/// Lookup of verify keys by author.
pub trait AuthorKeys {
    fn verify_key(&self, author: &UserId) -> Option<VerifyKey>;
}

impl AuthorKeys for HashMap<UserId, VerifyKey> {
    fn verify_key(&self, author: &UserId) -> Option<VerifyKey> {
        self.get(author).copied()
    }
}

#[derive(Encode, Decode, Clone, Debug)]
#[cbor(array)]
pub struct SignedEnvelope {
    #[n(0)]
    magic: String,
    #[n(1)]
    pub author: UserId,
    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub payload: Vec<u8>,
    #[n(3)]
    #[cbor(with = "minicbor::bytes")]
    pub signature: [u8; 64],
}

/// Encodes and signs `manifest` as the context's identity.
pub fn sign_manifest<M: Manifest>(ctx: &FsContext, manifest: &M) -> Result<Vec<u8>, ManifestError> {
    let payload = minicbor::to_vec(manifest)?;
    let envelope = SignedEnvelope {
        magic: ENVELOPE_MAGIC.to_string(),
        author: ctx.identity.user_id().clone(),
        signature: ctx.identity.signing_key().sign(&payload),
        payload,
    };
    Ok(minicbor::to_vec(&envelope)?)
}

/// Verifies the envelope signature, then decodes and validates the payload.
pub fn verify_manifest<M: Manifest>(
    signed: &[u8],
    keys: &dyn AuthorKeys,
) -> Result<(M, UserId), ManifestError> {
    let envelope: SignedEnvelope = minicbor::decode(signed)?;
    check_magic(&envelope.magic, ENVELOPE_MAGIC)?;
    let verify_key = keys
        .verify_key(&envelope.author)
        .ok_or_else(|| ManifestError::UnknownAuthor(envelope.author.clone()))?;
    verify_key
        .verify(&envelope.payload, &envelope.signature)
        .map_err(|_| ManifestError::BadSignature(envelope.author.clone()))?;
    let manifest: M = minicbor::decode(&envelope.payload)?;
    manifest.validate()?;
    Ok((manifest, envelope.author))
}

/// Signs and encrypts a manifest for storage in a vlob.
pub fn seal_manifest<M: Manifest>(
    ctx: &FsContext,
    manifest: &M,
    key: &SecretKey,
) -> Result<Bytes, ManifestError> {
    let signed = sign_manifest(ctx, manifest)?;
    Ok(key.encrypt(&signed)?.into())
}

pub fn open_manifest<M: Manifest>(
    ctx: &FsContext,
    blob: &[u8],
    key: &SecretKey,
) -> Result<(M, UserId), ManifestError> {
    let signed = key.decrypt(blob)?;
    verify_manifest(&signed, &ctx.keys)
}

/// Signs the user manifest and seals it to the user's own public key.
pub fn seal_user_manifest(ctx: &FsContext, manifest: &UserManifest) -> Result<Bytes, ManifestError> {
    let signed = sign_manifest(ctx, manifest)?;
    Ok(ctx.identity.public_key().seal(&signed)?.into())
}

pub fn open_user_manifest(ctx: &FsContext, blob: &[u8]) -> Result<UserManifest, ManifestError> {
    let signed = ctx.identity.private_key().open(blob)?;
    let (manifest, author) = verify_manifest::<UserManifest>(&signed, &ctx.keys)?;
    if &author != ctx.identity.user_id() {
        return Err(ManifestError::Schema(format!(
            "user manifest signed by {author}"
        )));
    }
    Ok(manifest)
}
