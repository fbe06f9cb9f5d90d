//! N-way merge of sorted block readers
//!
//! Readers are combined into a balanced binary tree of pairwise merge
//! nodes, so every emitted posting passes through O(log N) comparisons.
//! Each node owns its two children and one pending block per side.

use super::posting::{BlockReader, Posting};
use crate::error::Result;

/// Number of postings in a block produced by a merge node
pub const MERGE_BLOCK_SIZE: usize = 1024;

/// A node in the merge tree
pub enum MergeReader<'a> {
    /// Exhausted or absent source
    Empty,
    /// A source reader
    Leaf(Box<dyn BlockReader + 'a>),
    /// Pairwise merge of two subtrees
    Merge(Box<MergeNode<'a>>),
}

impl<'a> MergeReader<'a> {
    /// Merge two readers, eliding empty ones
    pub fn pair(left: MergeReader<'a>, right: MergeReader<'a>) -> MergeReader<'a> {
        match (left, right) {
            (MergeReader::Empty, right) => right,
            (left, MergeReader::Empty) => left,
            (left, right) => MergeReader::Merge(Box::new(MergeNode::new(left, right))),
        }
    }

    /// Height of the merge tree (0 for an empty reader, 1 for a leaf)
    pub fn depth(&self) -> usize {
        match self {
            MergeReader::Empty => 0,
            MergeReader::Leaf(_) => 1,
            MergeReader::Merge(node) => 1 + node.left.depth().max(node.right.depth()),
        }
    }
}

impl BlockReader for MergeReader<'_> {
    fn read_block(&mut self) -> Result<Option<Vec<Posting>>> {
        match self {
            MergeReader::Empty => Ok(None),
            MergeReader::Leaf(reader) => reader.read_block(),
            MergeReader::Merge(node) => node.read_block(),
        }
    }
}

/// Build a balanced merge tree over any number of readers
pub fn merge_readers<'a, I>(readers: I) -> MergeReader<'a>
where
    I: IntoIterator<Item = Box<dyn BlockReader + 'a>>,
{
    let leaves = readers.into_iter().map(MergeReader::Leaf).collect();
    build_tree(leaves)
}

fn build_tree(mut readers: Vec<MergeReader<'_>>) -> MergeReader<'_> {
    match readers.len() {
        0 => MergeReader::Empty,
        1 => readers.pop().unwrap_or(MergeReader::Empty),
        n => {
            let right = readers.split_off(n / 2);
            MergeReader::pair(build_tree(readers), build_tree(right))
        }
    }
}

/// Unconsumed part of the last block read from one side of a merge
#[derive(Debug, Default)]
struct PendingBlock {
    block: Vec<Posting>,
    pos: usize,
}

impl PendingBlock {
    fn is_empty(&self) -> bool {
        self.pos >= self.block.len()
    }

    fn head(&self) -> Posting {
        self.block[self.pos]
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn take(&mut self) -> Vec<Posting> {
        let mut block = std::mem::take(&mut self.block);
        block.drain(..self.pos);
        self.pos = 0;
        block
    }

    /// Pull blocks from `source` until there is data or it is exhausted.
    ///
    /// An exhausted source is replaced by `MergeReader::Empty`. On error the
    /// pending data is left as it was.
    fn refill(&mut self, source: &mut MergeReader<'_>) -> Result<()> {
        while self.is_empty() {
            if let MergeReader::Empty = source {
                break;
            }
            match source.read_block()? {
                Some(block) => {
                    self.block = block;
                    self.pos = 0;
                }
                None => *source = MergeReader::Empty,
            }
        }
        Ok(())
    }
}

/// Pairwise merge of two sorted readers
pub struct MergeNode<'a> {
    left: MergeReader<'a>,
    right: MergeReader<'a>,
    left_pending: PendingBlock,
    right_pending: PendingBlock,
}

impl<'a> MergeNode<'a> {
    fn new(left: MergeReader<'a>, right: MergeReader<'a>) -> Self {
        Self {
            left,
            right,
            left_pending: PendingBlock::default(),
            right_pending: PendingBlock::default(),
        }
    }

    fn read_block(&mut self) -> Result<Option<Vec<Posting>>> {
        self.left_pending.refill(&mut self.left)?;
        self.right_pending.refill(&mut self.right)?;

        match (self.left_pending.is_empty(), self.right_pending.is_empty()) {
            (false, false) => {
                let mut out = Vec::with_capacity(MERGE_BLOCK_SIZE);
                while out.len() < MERGE_BLOCK_SIZE {
                    let left = self.left_pending.head();
                    let right = self.right_pending.head();
                    // left wins ties
                    if left <= right {
                        out.push(left);
                        self.left_pending.advance();
                        if self.left_pending.is_empty() {
                            break;
                        }
                    } else {
                        out.push(right);
                        self.right_pending.advance();
                        if self.right_pending.is_empty() {
                            break;
                        }
                    }
                }
                Ok(Some(out))
            }
            (false, true) => Ok(Some(self.left_pending.take())),
            (true, false) => Ok(Some(self.right_pending.take())),
            (true, true) => Ok(None),
        }
    }
}
