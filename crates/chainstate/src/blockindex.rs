//! In-memory block tree: every known header, its cumulative work, and the
//! active chain by height.

use std::collections::HashMap;
use std::fmt;

use lccd_consensus::constants::MEDIAN_TIME_SPAN;
use lccd_consensus::Hash256;
use lccd_pow::difficulty::{block_proof, CompactError};
use lccd_pow::{HeaderInfo, HeaderSource};
use lccd_primitives::block::BlockHeader;
use primitive_types::U256;

pub const STATUS_HAVE_DATA: u32 = 1 << 0;
pub const STATUS_CONNECTED: u32 = 1 << 1;
pub const STATUS_FAILED: u32 = 1 << 2;

#[derive(Debug)]
pub enum BlockIndexError {
    UnknownParent(Hash256),
    Compact(CompactError),
}

impl fmt::Display for BlockIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIndexError::UnknownParent(hash) => write!(
                f,
                "parent block {} not in index",
                lccd_primitives::hash256_to_hex(hash)
            ),
            BlockIndexError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BlockIndexError {}

impl From<CompactError> for BlockIndexError {
    fn from(err: CompactError) -> Self {
        BlockIndexError::Compact(err)
    }
}

#[derive(Clone, Debug)]
pub struct BlockNode {
    pub info: HeaderInfo,
    pub prev: Option<usize>,
    skip: Option<usize>,
    pub chain_work: U256,
    pub status: u32,
}

impl BlockNode {
    pub fn height(&self) -> i32 {
        self.info.height
    }

    pub fn hash(&self) -> Hash256 {
        self.info.hash
    }
}

fn invert_lowest_one(value: i32) -> i32 {
    value & value.saturating_sub(1)
}

/// Height the skip pointer of a block at `height` points to.
fn get_skip_height(height: i32) -> i32 {
    if height < 2 {
        0
    } else if (height & 1) != 0 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

pub struct BlockTree {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash256, usize>,
    active: Vec<usize>,
}

impl BlockTree {
    pub fn new(genesis: &BlockHeader) -> Result<Self, BlockIndexError> {
        let node = BlockNode {
            info: HeaderInfo::from_header(genesis, 0),
            prev: None,
            skip: None,
            chain_work: block_proof(genesis.bits)?,
            status: STATUS_HAVE_DATA | STATUS_CONNECTED,
        };
        let mut by_hash = HashMap::new();
        by_hash.insert(node.hash(), 0);
        Ok(Self {
            nodes: vec![node],
            by_hash,
            active: vec![0],
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn slot(&self, hash: &Hash256) -> Option<usize> {
        self.by_hash.get(hash).copied()
    }

    pub fn node(&self, slot: usize) -> &BlockNode {
        &self.nodes[slot]
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockNode> {
        self.slot(hash).map(|slot| &self.nodes[slot])
    }

    /// Adds a header whose parent is already known and returns its slot. A
    /// header seen before keeps its slot.
    pub fn insert_header(&mut self, header: &BlockHeader) -> Result<usize, BlockIndexError> {
        let hash = header.hash();
        if let Some(slot) = self.slot(&hash) {
            return Ok(slot);
        }
        let prev = self
            .slot(&header.prev_block)
            .ok_or(BlockIndexError::UnknownParent(header.prev_block))?;
        let parent = &self.nodes[prev];
        let height = parent.height() + 1;
        let chain_work = parent.chain_work.saturating_add(block_proof(header.bits)?);
        let status = if parent.status & STATUS_FAILED != 0 {
            STATUS_FAILED
        } else {
            0
        };
        let skip = self.ancestor(prev, get_skip_height(height));
        let slot = self.nodes.len();
        self.nodes.push(BlockNode {
            info: HeaderInfo::from_header(header, height),
            prev: Some(prev),
            skip,
            chain_work,
            status,
        });
        self.by_hash.insert(hash, slot);
        Ok(slot)
    }

    pub fn set_status(&mut self, slot: usize, flags: u32) {
        self.nodes[slot].status |= flags;
    }

    /// Ancestor of `slot` at `height`, following skip pointers.
    pub fn ancestor(&self, slot: usize, height: i32) -> Option<usize> {
        let mut walk = slot;
        let mut walk_height = self.nodes[slot].height();
        if height > walk_height || height < 0 {
            return None;
        }
        while walk_height > height {
            let skip_height = get_skip_height(walk_height);
            let skip_height_prev = get_skip_height(walk_height - 1);
            let node = &self.nodes[walk];
            match node.skip {
                Some(skip)
                    if skip_height == height
                        || (skip_height > height
                            && !(skip_height_prev < skip_height - 2
                                && skip_height_prev >= height)) =>
                {
                    walk = skip;
                    walk_height = skip_height;
                }
                _ => {
                    walk = node.prev?;
                    walk_height -= 1;
                }
            }
        }
        Some(walk)
    }

    pub fn tip(&self) -> &BlockNode {
        let slot = self.active.last().copied().unwrap_or(0);
        &self.nodes[slot]
    }

    pub fn tip_slot(&self) -> usize {
        self.active.last().copied().unwrap_or(0)
    }

    pub fn height(&self) -> i32 {
        self.active.len() as i32 - 1
    }

    pub fn is_active(&self, slot: usize) -> bool {
        let height = self.nodes[slot].height();
        usize::try_from(height)
            .ok()
            .and_then(|height| self.active.get(height))
            == Some(&slot)
    }

    /// Makes `slot` the active tip and returns the height of the fork point.
    pub fn set_tip(&mut self, slot: usize) -> i32 {
        let mut branch = Vec::new();
        let mut cursor = Some(slot);
        while let Some(current) = cursor {
            if self.is_active(current) {
                break;
            }
            branch.push(current);
            cursor = self.nodes[current].prev;
        }
        let fork_height = cursor.map(|fork| self.nodes[fork].height()).unwrap_or(-1);
        self.active.truncate((fork_height + 1) as usize);
        self.active.extend(branch.into_iter().rev());
        fork_height
    }

    /// Headers of the chain ending at `tip`, which need not be active.
    pub fn branch(&self, tip: usize) -> BranchView<'_> {
        BranchView { tree: self, tip }
    }
}

impl HeaderSource for BlockTree {
    fn header_at(&self, height: i32) -> Option<HeaderInfo> {
        let slot = *self.active.get(usize::try_from(height).ok()?)?;
        Some(self.nodes[slot].info)
    }
}

#[derive(Clone, Copy)]
pub struct BranchView<'a> {
    tree: &'a BlockTree,
    tip: usize,
}

impl BranchView<'_> {
    pub fn tip(&self) -> HeaderInfo {
        self.tree.nodes[self.tip].info
    }
}

impl HeaderSource for BranchView<'_> {
    fn header_at(&self, height: i32) -> Option<HeaderInfo> {
        if height > self.tree.nodes[self.tip].height() {
            return None;
        }
        if self.tree.is_active(self.tip) {
            return self.tree.header_at(height);
        }
        let slot = self.tree.ancestor(self.tip, height)?;
        Some(self.tree.nodes[slot].info)
    }
}

/// Median timestamp of the block at `height` and up to ten blocks before it.
pub fn median_time_past<S: HeaderSource + ?Sized>(chain: &S, height: i32) -> i64 {
    let first = (height - MEDIAN_TIME_SPAN as i32 + 1).max(0);
    let mut times: Vec<i64> = (first..=height)
        .filter_map(|height| chain.header_at(height))
        .map(|header| header.time)
        .collect();
    if times.is_empty() {
        return 0;
    }
    times.sort_unstable();
    times[times.len() / 2]
}
