//! Dustbin purging.
//!
//! Which dustbin entries get purged is a policy decision left to the
//! embedding application. Purging an entry deletes every block referenced
//! by any version of the file, then the file vlob itself.

use parsec_core::{VlobError, VlobId};
use serde::Serialize;
use std::{fmt, time::Duration};
use tracing::{debug, warn};

use crate::{
    context::FsContext,
    error::FSResult,
    file::{all_block_ids, cleanup_blocks},
    manifest::{DustbinEntry, Timestamp},
};

/// Chooses the dustbin entries to purge.
pub trait PurgePolicy: fmt::Debug + Send + Sync {
    fn select(&self, dustbin: &[DustbinEntry], now: Timestamp) -> Vec<VlobId>;
}

/// Never purges on its own. Entries go away only through explicit purges.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualPurge;

impl PurgePolicy for ManualPurge {
    fn select(&self, _dustbin: &[DustbinEntry], _now: Timestamp) -> Vec<VlobId> {
        Vec::new()
    }
}

/// Purges entries deleted at least this long ago.
#[derive(Debug, Clone, Copy)]
pub struct PurgeOlderThan(pub Duration);

impl PurgePolicy for PurgeOlderThan {
    fn select(&self, dustbin: &[DustbinEntry], now: Timestamp) -> Vec<VlobId> {
        let age = i64::try_from(self.0.as_micros()).unwrap_or(i64::MAX);
        dustbin
            .iter()
            .filter(|entry| now.saturating_sub(entry.removed_at) >= age)
            .map(|entry| entry.id().clone())
            .collect()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub purged: Vec<VlobId>,
    pub blocks_deleted: usize,
    /// Entries that stayed in the dustbin, with the reason.
    pub failed: Vec<(VlobId, String)>,
}

/// Deletes the data of a dustbin entry. Returns the number of blocks
/// deleted. A vlob that is already gone is not an error.
pub(crate) async fn purge_entry(ctx: &FsContext, entry: &DustbinEntry) -> FSResult<usize> {
    let access = &entry.access;
    let blocks = match all_block_ids(ctx, access).await {
        Ok(blocks) => blocks,
        Err(crate::FsError::Vlob(VlobError::NotFound(_))) => {
            warn!(vlob = %access.id, "purged file had no vlob left");
            return Ok(0);
        }
        Err(err) => return Err(err),
    };
    let count = blocks.len();
    cleanup_blocks(ctx, blocks).await;

    match ctx
        .vlobs
        .vlob_delete(&access.id, &access.write_trust_seed)
        .await
    {
        Ok(()) | Err(VlobError::NotFound(_)) => {}
        Err(err) => return Err(err.into()),
    }
    debug!(vlob = %access.id, blocks = count, path = %entry.path, "dustbin entry purged");
    Ok(count)
}
