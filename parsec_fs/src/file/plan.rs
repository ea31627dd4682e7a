//! Pure planning of reads and writes over a file's block runs.
//!
//! The planner never touches the network. It tells the file engine which
//! runs survive unchanged, which blocks are replaced and which byte ranges
//! of the straddling blocks must be fetched to rebuild the edited region.

use parsec_core::SecretKey;
use std::ops::Range;

use crate::manifest::{BlockAccess, BlockRun, push_block};

/// A block together with the key of the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedBlock {
    pub key: SecretKey,
    pub block: BlockAccess,
}

/// Part of a block's cleartext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSlice {
    pub source: KeyedBlock,
    pub range: Range<usize>,
}

impl BlockSlice {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// How a write over `[offset, end)` reshapes the existing runs.
///
/// The new cleartext is `pre_excluded_data ++ zeros(padding) ++ data ++
/// post_excluded_data`, stored in a fresh run placed between
/// `pre_excluded_blocks` and `post_excluded_blocks`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub pre_excluded_blocks: Vec<BlockRun>,
    /// Kept prefix of the block straddling `offset`.
    pub pre_excluded_data: Option<BlockSlice>,
    /// Blocks overlapping the window. None of them survive.
    pub included_blocks: Vec<KeyedBlock>,
    /// Kept suffix of the block straddling `end`. When the window starts and
    /// ends inside one block, that block yields both slices.
    pub post_excluded_data: Option<BlockSlice>,
    pub post_excluded_blocks: Vec<BlockRun>,
    /// Zero bytes between the current end of file and `offset`.
    pub padding: u64,
}

/// Plans a write of the window `[offset, end)`. `end == None` means the
/// window extends past the end of the file, which is how truncation is
/// expressed.
///
/// Zero-size blocks never survive a write: they only exist to keep an
/// empty file non-empty.
pub fn plan_write(runs: &[BlockRun], offset: u64, end: Option<u64>) -> WritePlan {
    let mut plan = WritePlan::default();
    let mut cursor = 0u64;

    for run in runs {
        let key = run.key();
        for block in &run.blocks {
            let start = cursor;
            let stop = cursor + block.size;
            cursor = stop;
            if block.size == 0 {
                continue;
            }

            if stop <= offset {
                push_block(&mut plan.pre_excluded_blocks, &key, block.clone());
            } else if end.is_some_and(|end| start >= end) {
                push_block(&mut plan.post_excluded_blocks, &key, block.clone());
            } else {
                let keyed = KeyedBlock {
                    key: key.clone(),
                    block: block.clone(),
                };
                if start < offset {
                    plan.pre_excluded_data = Some(BlockSlice {
                        source: keyed.clone(),
                        range: 0..(offset - start) as usize,
                    });
                }
                if let Some(end) = end
                    && stop > end
                {
                    plan.post_excluded_data = Some(BlockSlice {
                        source: keyed.clone(),
                        range: (end - start) as usize..block.size as usize,
                    });
                }
                plan.included_blocks.push(keyed);
            }
        }
    }

    plan.padding = offset.saturating_sub(cursor);
    plan
}

/// Slices to concatenate to read `[offset, offset + size)`. Blocks outside
/// the window are never listed, so they are never fetched or decrypted.
pub fn plan_read(runs: &[BlockRun], offset: u64, size: Option<u64>) -> Vec<BlockSlice> {
    let end = size.map(|size| offset.saturating_add(size));
    let mut slices = Vec::new();
    let mut cursor = 0u64;

    for run in runs {
        let key = run.key();
        for block in &run.blocks {
            let start = cursor;
            let stop = cursor + block.size;
            cursor = stop;
            if block.size == 0 || stop <= offset {
                continue;
            }
            if end.is_some_and(|end| start >= end) {
                return slices;
            }
            let from = offset.saturating_sub(start);
            let to = end.map_or(block.size, |end| end.min(stop) - start);
            slices.push(BlockSlice {
                source: KeyedBlock {
                    key: key.clone(),
                    block: block.clone(),
                },
                range: from as usize..to as usize,
            });
        }
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_core::{BlockDigest, BlockId};

    fn block(id: &str, size: u64) -> BlockAccess {
        BlockAccess {
            id: BlockId::new(id),
            digest: BlockDigest::new(id),
            size,
        }
    }

    /// One run per key, block sizes given per run.
    fn runs(layout: &[&[(&str, u64)]]) -> Vec<BlockRun> {
        layout
            .iter()
            .map(|blocks| {
                BlockRun::new(
                    &SecretKey::generate(),
                    blocks.iter().map(|(id, size)| block(id, *size)).collect(),
                )
            })
            .collect()
    }

    fn ids(runs: &[BlockRun]) -> Vec<Vec<&str>> {
        runs.iter()
            .map(|run| run.blocks.iter().map(|b| b.id.as_str()).collect())
            .collect()
    }

    #[test]
    fn write_on_block_boundaries_keeps_whole_runs() {
        let runs = runs(&[&[("a", 4), ("b", 4)], &[("c", 4)]]);
        let plan = plan_write(&runs, 4, Some(8));

        assert_eq!(ids(&plan.pre_excluded_blocks), vec![vec!["a"]]);
        assert_eq!(ids(&plan.post_excluded_blocks), vec![vec!["c"]]);
        assert_eq!(plan.included_blocks.len(), 1);
        assert!(plan.pre_excluded_data.is_none());
        assert!(plan.post_excluded_data.is_none());
        assert_eq!(plan.padding, 0);
        // The kept prefix run still has the original key.
        assert!(plan.pre_excluded_blocks[0].has_key(&runs[0].key()));
    }

    #[test]
    fn straddling_blocks_yield_kept_slices() {
        let runs = runs(&[&[("a", 4), ("b", 4), ("c", 4)]]);
        let plan = plan_write(&runs, 2, Some(10));

        assert!(plan.pre_excluded_blocks.is_empty());
        assert!(plan.post_excluded_blocks.is_empty());
        let pre = plan.pre_excluded_data.unwrap();
        assert_eq!(pre.source.block.id.as_str(), "a");
        assert_eq!(pre.range, 0..2);
        let post = plan.post_excluded_data.unwrap();
        assert_eq!(post.source.block.id.as_str(), "c");
        assert_eq!(post.range, 2..4);
        assert_eq!(plan.included_blocks.len(), 3);
    }

    #[test]
    fn window_inside_a_single_block() {
        let runs = runs(&[&[("a", 10)], &[("b", 10)]]);
        let plan = plan_write(&runs, 3, Some(7));

        let pre = plan.pre_excluded_data.unwrap();
        let post = plan.post_excluded_data.unwrap();
        assert_eq!(pre.source.block.id.as_str(), "a");
        assert_eq!(post.source.block.id.as_str(), "a");
        assert_eq!(pre.range, 0..3);
        assert_eq!(post.range, 7..10);
        assert_eq!(plan.included_blocks.len(), 1);
        assert_eq!(ids(&plan.post_excluded_blocks), vec![vec!["b"]]);
    }

    #[test]
    fn write_past_end_pads_and_drops_empty_blocks() {
        let runs = runs(&[&[("empty", 0)]]);
        let plan = plan_write(&runs, 5, Some(8));
        assert!(plan.pre_excluded_blocks.is_empty());
        assert!(plan.included_blocks.is_empty());
        assert_eq!(plan.padding, 5);

        let runs = self::runs(&[&[("a", 4)]]);
        let plan = plan_write(&runs, 6, Some(7));
        assert_eq!(ids(&plan.pre_excluded_blocks), vec![vec!["a"]]);
        assert_eq!(plan.padding, 2);
    }

    #[test]
    fn truncate_keeps_prefix_of_last_block() {
        let runs = runs(&[&[("a", 4), ("b", 4), ("c", 4)]]);
        let plan = plan_write(&runs, 6, None);

        assert_eq!(ids(&plan.pre_excluded_blocks), vec![vec!["a"]]);
        assert_eq!(plan.pre_excluded_data.unwrap().range, 0..2);
        assert!(plan.post_excluded_data.is_none());
        assert!(plan.post_excluded_blocks.is_empty());
        assert_eq!(plan.included_blocks.len(), 2);
    }

    #[test]
    fn pre_excluded_blocks_coalesce_by_key() {
        let runs = runs(&[&[("a", 4), ("b", 4)], &[("c", 4)], &[("d", 4)]]);
        let plan = plan_write(&runs, 12, Some(13));
        assert_eq!(ids(&plan.pre_excluded_blocks), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn read_touches_only_overlapping_blocks() {
        let runs = runs(&[&[("a", 4), ("b", 4)], &[("c", 4)]]);
        let slices = plan_read(&runs, 3, Some(3));
        let got: Vec<(&str, Range<usize>)> = slices
            .iter()
            .map(|s| (s.source.block.id.as_str(), s.range.clone()))
            .collect();
        assert_eq!(got, vec![("a", 3..4), ("b", 0..2)]);

        let to_end = plan_read(&runs, 7, None);
        assert_eq!(to_end.iter().map(BlockSlice::len).sum::<usize>(), 5);

        assert!(plan_read(&runs, 12, Some(10)).is_empty());
        assert!(plan_read(&runs, 40, None).is_empty());
    }
}
