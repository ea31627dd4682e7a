//! File engine: the in-memory state of one file manifest and every
//! operation that mutates it.
//!
//! Writes build new blocks right away and keep the mutation in `pending`,
//! so that a commit losing the optimistic-concurrency race can rebase onto
//! the remote manifest and replay them.

mod plan;

pub use plan::{BlockSlice, KeyedBlock, WritePlan, plan_read, plan_write};

use bytes::{Bytes, BytesMut};
use parsec_core::{BlockDigest, BlockId, SecretKey, VlobError, VlobId};
use serde::Serialize;
use std::{collections::BTreeSet, ops::Range};
use tracing::{debug, warn};

use crate::{
    context::FsContext,
    error::{FSResult, FsError},
    manifest::{
        BlockAccess, BlockRun, FileManifest, FileManifestAccess, ManifestError, Timestamp,
        VlobAccess, open_manifest, seal_manifest,
    },
};

/// Metadata of one file version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub version: u64,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub size: u64,
}

#[derive(Debug, Clone)]
enum FileOp {
    Write { offset: u64, data: Bytes },
    Truncate { length: u64 },
}

#[derive(Debug)]
pub struct FileState {
    access: FileManifestAccess,
    /// Latest committed version known to this client.
    base_version: u64,
    base_manifest: FileManifest,
    manifest: FileManifest,
    pending: Vec<FileOp>,
    /// Blocks created since the last commit.
    created_blocks: Vec<BlockId>,
}

impl FileState {
    /// Creates a new, empty file and pushes it as version 1.
    pub async fn create(ctx: &FsContext) -> FSResult<Self> {
        let now = ctx.now();
        let block_size = ctx.config.block_size;
        let (key, blocks) = store_chunks(ctx, &Region::default(), block_size).await?;
        let manifest = FileManifest::new(now, block_size, vec![BlockRun::new(&key, blocks)]);

        let vlob_key = SecretKey::generate();
        let blob = seal_manifest(ctx, &manifest, &vlob_key)?;
        let created = match ctx.vlobs.vlob_create(None, blob).await {
            Ok(created) => created,
            Err(err) => {
                cleanup_blocks(ctx, manifest.block_ids()).await;
                return Err(err.into());
            }
        };
        debug!(vlob = %created.id, "file created");

        let access = VlobAccess::new(
            created.id,
            created.read_trust_seed,
            created.write_trust_seed,
            &vlob_key,
        );
        Ok(Self::clean(access, 1, manifest))
    }

    /// Loads the latest committed version of `access`.
    pub async fn load(ctx: &FsContext, access: &FileManifestAccess) -> FSResult<Self> {
        let (manifest, version) = read_manifest(ctx, access, None).await?;
        Ok(Self::clean(access.clone(), version, manifest))
    }

    fn clean(access: FileManifestAccess, version: u64, manifest: FileManifest) -> Self {
        Self {
            access,
            base_version: version,
            base_manifest: manifest.clone(),
            manifest,
            pending: Vec::new(),
            created_blocks: Vec::new(),
        }
    }

    pub fn access(&self) -> &FileManifestAccess {
        &self.access
    }

    pub fn id(&self) -> &VlobId {
        &self.access.id
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.manifest.size()
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            version: self.base_version + u64::from(self.is_dirty()),
            created: self.manifest.created,
            updated: self.manifest.updated,
            size: self.manifest.size(),
        }
    }

    pub async fn read(&self, ctx: &FsContext, offset: u64, size: Option<u64>) -> FSResult<Bytes> {
        read_runs(ctx, &self.manifest.runs, offset, size).await
    }

    pub async fn write(&mut self, ctx: &FsContext, offset: u64, data: Bytes) -> FSResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let max = ctx.config.max_file_size;
        if offset
            .checked_add(data.len() as u64)
            .is_none_or(|end| end > max)
        {
            return Err(FsError::BadParams(format!(
                "writing {} bytes at offset {offset} exceeds the maximum file size of {max} bytes",
                data.len()
            )));
        }
        self.apply(ctx, FileOp::Write { offset, data }).await
    }

    /// Drops everything at or past `length`. Never grows the file.
    pub async fn truncate(&mut self, ctx: &FsContext, length: u64) -> FSResult<()> {
        if length >= self.manifest.size() {
            return Ok(());
        }
        self.apply(ctx, FileOp::Truncate { length }).await
    }

    async fn apply(&mut self, ctx: &FsContext, op: FileOp) -> FSResult<()> {
        let (offset, data, end) = match &op {
            FileOp::Write { offset, data } => (
                *offset,
                data.clone(),
                Some(offset.saturating_add(data.len() as u64)),
            ),
            FileOp::Truncate { length } => {
                if *length >= self.manifest.size() {
                    return Ok(());
                }
                (*length, Bytes::new(), None)
            }
        };

        let plan = plan_write(&self.manifest.runs, offset, end);

        let head = match &plan.pre_excluded_data {
            Some(slice) => fetch_slice(ctx, slice).await?,
            None => Bytes::new(),
        };
        let tail = match &plan.post_excluded_data {
            Some(slice) => {
                let suffix = fetch_slice(ctx, slice).await?;
                let mut tail = BytesMut::with_capacity(data.len() + suffix.len());
                tail.extend_from_slice(&data);
                tail.extend_from_slice(&suffix);
                tail.freeze()
            }
            None => data,
        };
        let region = Region {
            head,
            zeros: plan.padding,
            tail,
        };

        let mut runs = plan.pre_excluded_blocks;
        let keep_empty = runs.is_empty() && plan.post_excluded_blocks.is_empty();
        if !region.is_empty() || keep_empty {
            let (key, blocks) = store_chunks(ctx, &region, self.manifest.block_size).await?;
            let stored: BTreeSet<BlockId> = blocks.iter().map(|b| b.id.clone()).collect();
            self.created_blocks.extend(stored);
            runs.push(BlockRun::new(&key, blocks));
        }
        runs.extend(plan.post_excluded_blocks);

        self.manifest.runs = runs;
        self.manifest.updated = ctx.now();
        debug!(
            vlob = %self.access.id,
            replaced = plan.included_blocks.len(),
            size = self.manifest.size(),
            "file manifest rebuilt"
        );
        self.pending.push(op);
        Ok(())
    }

    /// Pushes pending changes as `base_version + 1`, rebasing and replaying
    /// on version conflicts. Returns the access of the committed file.
    pub async fn commit(&mut self, ctx: &FsContext) -> FSResult<FileManifestAccess> {
        if !self.is_dirty() {
            return Ok(self.access.clone());
        }

        let mut attempt = 0;
        loop {
            let blob = seal_manifest(ctx, &self.manifest, &self.access.key())?;
            let target = self.base_version + 1;
            match ctx
                .vlobs
                .vlob_update(&self.access.id, &self.access.write_trust_seed, target, blob)
                .await
            {
                Ok(()) => break,
                Err(VlobError::BadVersion { current }) if attempt < ctx.config.max_update_retries => {
                    attempt += 1;
                    warn!(
                        vlob = %self.access.id,
                        expected = target,
                        current,
                        attempt,
                        "file changed remotely, replaying local writes"
                    );
                    self.rebase(ctx).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let live = self.manifest.block_ids();
        let mut unused: BTreeSet<BlockId> = self
            .created_blocks
            .drain(..)
            .filter(|id| !live.contains(id))
            .collect();
        if ctx.config.prune_superseded_blocks {
            unused.extend(self.base_manifest.block_ids().difference(&live).cloned());
        }
        cleanup_blocks(ctx, unused).await;

        self.base_version += 1;
        self.base_manifest = self.manifest.clone();
        self.pending.clear();
        debug!(vlob = %self.access.id, version = self.base_version, "file committed");
        Ok(self.access.clone())
    }

    /// Replays the pending operations on top of the latest remote version.
    /// Nothing changes locally unless every operation replays.
    async fn rebase(&mut self, ctx: &FsContext) -> FSResult<()> {
        let (remote, version) = read_manifest(ctx, &self.access, None).await?;
        let mut replay = Self::clean(self.access.clone(), version, remote);
        for op in &self.pending {
            if let Err(err) = replay.apply(ctx, op.clone()).await {
                cleanup_blocks(ctx, replay.created_blocks).await;
                return Err(err);
            }
        }

        let created = std::mem::take(&mut self.created_blocks);
        cleanup_blocks(ctx, created).await;
        *self = replay;
        Ok(())
    }

    /// Forgets uncommitted changes and deletes the blocks they created.
    pub async fn discard(&mut self, ctx: &FsContext) {
        if !self.is_dirty() && self.created_blocks.is_empty() {
            return;
        }
        let created = std::mem::take(&mut self.created_blocks);
        cleanup_blocks(ctx, created).await;
        self.manifest = self.base_manifest.clone();
        self.pending.clear();
        debug!(vlob = %self.access.id, "uncommitted changes discarded");
    }

    /// Republishes `version` as the newest version.
    ///
    /// `None` restores the version just before the current one.
    pub async fn restore(&mut self, ctx: &FsContext, version: Option<u64>) -> FSResult<()> {
        self.discard(ctx).await;

        let mut attempt = 0;
        loop {
            let (_, current) = read_manifest(ctx, &self.access, None).await?;
            let version = version.unwrap_or(current.saturating_sub(1));
            if version < 1 || version >= current {
                return Err(FsError::BadVersion(format!(
                    "cannot restore version {version}, current version is {current}"
                )));
            }
            let (old, _) = read_manifest(ctx, &self.access, Some(version)).await?;
            let blob = seal_manifest(ctx, &old, &self.access.key())?;
            match ctx
                .vlobs
                .vlob_update(&self.access.id, &self.access.write_trust_seed, current + 1, blob)
                .await
            {
                Ok(()) => {
                    debug!(vlob = %self.access.id, version, new_version = current + 1, "version restored");
                    *self = Self::clean(self.access.clone(), current + 1, old);
                    return Ok(());
                }
                Err(VlobError::BadVersion { .. }) if attempt < ctx.config.max_update_retries => {
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Moves the file to a brand new vlob with a fresh key and trust seeds.
    ///
    /// Pending changes are committed first. The old vlob is left alone: the
    /// caller deletes it with [`retire_vlob`] once nothing persisted points
    /// at it anymore.
    pub async fn reencrypt(&mut self, ctx: &FsContext) -> FSResult<FileManifestAccess> {
        self.commit(ctx).await?;

        let key = SecretKey::generate();
        let blob = seal_manifest(ctx, &self.manifest, &key)?;
        let created = ctx.vlobs.vlob_create(None, blob).await?;
        let access = VlobAccess::new(
            created.id,
            created.read_trust_seed,
            created.write_trust_seed,
            &key,
        );

        debug!(old = %self.access.id, new = %access.id, "file reencrypted");
        *self = Self::clean(access.clone(), 1, self.manifest.clone());
        Ok(access)
    }

    /// Stats of the committed versions `first..=last` (`last` defaults to
    /// the latest version).
    pub async fn history(
        &self,
        ctx: &FsContext,
        first: u64,
        last: Option<u64>,
    ) -> FSResult<Vec<FileStat>> {
        history(ctx, &self.access, first, last).await
    }
}

/// Deletes a vlob whose file moved elsewhere, so its old capability stops
/// working. Failures are only logged.
pub async fn retire_vlob(ctx: &FsContext, access: &FileManifestAccess) {
    match ctx
        .vlobs
        .vlob_delete(&access.id, &access.write_trust_seed)
        .await
    {
        Ok(()) | Err(VlobError::NotFound(_)) => debug!(vlob = %access.id, "old vlob deleted"),
        Err(err) => warn!(vlob = %access.id, "could not delete reencrypted vlob: {err}"),
    }
}

pub async fn history(
    ctx: &FsContext,
    access: &FileManifestAccess,
    first: u64,
    last: Option<u64>,
) -> FSResult<Vec<FileStat>> {
    let (latest, current) = read_manifest(ctx, access, None).await?;
    let last = last.unwrap_or(current);
    if first < 1 || first > last {
        return Err(FsError::BadParams(format!(
            "invalid version range {first}..={last}"
        )));
    }
    if last > current {
        return Err(FsError::BadVersion(format!(
            "version {last} does not exist, current version is {current}"
        )));
    }

    let mut stats = Vec::with_capacity((last - first + 1) as usize);
    for version in first..=last {
        let manifest = if version == current {
            latest.clone()
        } else {
            read_manifest(ctx, access, Some(version)).await?.0
        };
        stats.push(FileStat {
            version,
            created: manifest.created,
            updated: manifest.updated,
            size: manifest.size(),
        });
    }
    Ok(stats)
}

/// Every block referenced by any committed version of the file.
pub async fn all_block_ids(
    ctx: &FsContext,
    access: &FileManifestAccess,
) -> FSResult<BTreeSet<BlockId>> {
    let (latest, current) = read_manifest(ctx, access, None).await?;
    let mut ids = latest.block_ids();
    for version in 1..current {
        let (manifest, _) = read_manifest(ctx, access, Some(version)).await?;
        ids.extend(manifest.block_ids());
    }
    Ok(ids)
}

async fn read_manifest(
    ctx: &FsContext,
    access: &FileManifestAccess,
    version: Option<u64>,
) -> FSResult<(FileManifest, u64)> {
    let blob = ctx
        .vlobs
        .vlob_read(&access.id, &access.read_trust_seed, version)
        .await?;
    let (manifest, _author) = open_manifest::<FileManifest>(ctx, &blob.blob, &access.key())?;
    Ok((manifest, blob.version))
}

/// Cleartext of a rebuilt region: the kept prefix, a gap of zeros, then
/// the written data followed by the kept suffix. The gap is never
/// materialized as a whole.
#[derive(Debug, Default)]
struct Region {
    head: Bytes,
    zeros: u64,
    tail: Bytes,
}

impl Region {
    fn len(&self) -> u64 {
        self.head.len() as u64 + self.zeros + self.tail.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_zeros(&self, range: &Range<u64>) -> bool {
        let head = self.head.len() as u64;
        range.start >= head && range.end <= head + self.zeros
    }

    fn copy(&self, range: Range<u64>) -> Vec<u8> {
        let head = self.head.len() as u64;
        let gap_end = head + self.zeros;
        let mut out = Vec::with_capacity((range.end - range.start) as usize);
        if range.start < head {
            out.extend_from_slice(&self.head[range.start as usize..range.end.min(head) as usize]);
        }
        let zeros = range
            .end
            .min(gap_end)
            .saturating_sub(range.start.max(head));
        out.resize(out.len() + zeros as usize, 0);
        if range.end > gap_end {
            let from = range.start.max(gap_end) - gap_end;
            out.extend_from_slice(&self.tail[from as usize..(range.end - gap_end) as usize]);
        }
        out
    }
}

/// Splits `region` into chunks of at most `block_size` bytes, encrypts them
/// under one fresh key and stores them. An empty region yields one empty
/// block. Full chunks of zeros are stored once and shared.
async fn store_chunks(
    ctx: &FsContext,
    region: &Region,
    block_size: u64,
) -> FSResult<(SecretKey, Vec<BlockAccess>)> {
    let key = SecretKey::generate();
    let total = region.len();
    if total == 0 {
        let block = store_chunk(ctx, &key, &[]).await?;
        return Ok((key, vec![block]));
    }

    let mut blocks = Vec::new();
    let mut stored = Vec::new();
    let mut zero_block: Option<BlockAccess> = None;
    let mut start = 0;
    while start < total {
        let range = start..total.min(start + block_size);
        start = range.end;
        let full_gap = range.end - range.start == block_size && region.is_zeros(&range);
        if full_gap && let Some(block) = &zero_block {
            blocks.push(block.clone());
            continue;
        }
        let block = match store_chunk(ctx, &key, &region.copy(range)).await {
            Ok(block) => block,
            Err(err) => {
                cleanup_blocks(ctx, stored).await;
                return Err(err);
            }
        };
        stored.push(block.id.clone());
        if full_gap {
            zero_block = Some(block.clone());
        }
        blocks.push(block);
    }
    Ok((key, blocks))
}

async fn store_chunk(ctx: &FsContext, key: &SecretKey, chunk: &[u8]) -> FSResult<BlockAccess> {
    let ciphertext = key.encrypt(chunk)?;
    let id = ctx.blocks.create(ciphertext.into(), None).await?;
    Ok(BlockAccess {
        id,
        digest: BlockDigest::new(chunk),
        size: chunk.len() as u64,
    })
}

/// Fetches and decrypts a block, checking its size and digest.
pub(crate) async fn fetch_block(ctx: &FsContext, source: &KeyedBlock) -> FSResult<Bytes> {
    let ciphertext = ctx.blocks.read(&source.block.id).await?;
    let cleartext = source.key.decrypt(&ciphertext)?;
    if cleartext.len() as u64 != source.block.size
        || BlockDigest::new(&cleartext) != source.block.digest
    {
        return Err(ManifestError::Integrity(source.block.id.clone()).into());
    }
    Ok(cleartext.into())
}

async fn fetch_slice(ctx: &FsContext, slice: &BlockSlice) -> FSResult<Bytes> {
    let cleartext = fetch_block(ctx, &slice.source).await?;
    Ok(cleartext.slice(slice.range.clone()))
}

pub(crate) async fn read_runs(
    ctx: &FsContext,
    runs: &[BlockRun],
    offset: u64,
    size: Option<u64>,
) -> FSResult<Bytes> {
    let slices = plan_read(runs, offset, size);
    if let [single] = slices.as_slice() {
        return fetch_slice(ctx, single).await;
    }
    let mut out = BytesMut::with_capacity(slices.iter().map(BlockSlice::len).sum());
    for slice in &slices {
        out.extend_from_slice(&fetch_slice(ctx, slice).await?);
    }
    Ok(out.freeze())
}

/// Deletes blocks that are no longer referenced. Failures are only logged:
/// an orphaned block wastes space but never breaks a file.
pub(crate) async fn cleanup_blocks(ctx: &FsContext, ids: impl IntoIterator<Item = BlockId>) {
    for id in ids {
        if let Err(err) = ctx.blocks.delete(&id).await {
            warn!(block = %id, "could not delete unused block: {err}");
        }
    }
}
