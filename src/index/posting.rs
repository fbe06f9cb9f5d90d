//! Postings and the block reader abstraction

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single (term, doc_id) pair in the inverted index.
///
/// Field order gives the derived ordering: term first, then doc_id.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Posting {
    /// Fingerprint sub-hash used as the index key
    pub term: u32,
    /// Document the term belongs to
    pub doc_id: u32,
}

impl Posting {
    pub fn new(term: u32, doc_id: u32) -> Self {
        Self { term, doc_id }
    }
}

/// Source of sorted postings, read one block at a time.
///
/// Any implementation (in-memory buffer, segment file, remote stream) can
/// take part in a merge.
pub trait BlockReader {
    /// Read the next block of postings in (term, doc_id) order.
    ///
    /// `Ok(None)` signals the end of the stream. Blocks may be empty.
    fn read_block(&mut self) -> Result<Option<Vec<Posting>>>;
}

impl<R: BlockReader + ?Sized> BlockReader for Box<R> {
    fn read_block(&mut self) -> Result<Option<Vec<Posting>>> {
        (**self).read_block()
    }
}

/// Read all remaining postings from a reader into a vector
pub fn read_all<R: BlockReader + ?Sized>(reader: &mut R) -> Result<Vec<Posting>> {
    let mut postings = Vec::new();
    while let Some(block) = reader.read_block()? {
        postings.extend_from_slice(&block);
    }
    Ok(postings)
}

/// Reader over an owned, already sorted vector of postings
#[derive(Clone, Debug)]
pub struct VecReader {
    postings: Vec<Posting>,
    pos: usize,
    block_size: usize,
}

impl VecReader {
    /// Create a reader yielding `block_size` postings per block
    pub fn new(postings: Vec<Posting>, block_size: usize) -> Self {
        Self {
            postings,
            pos: 0,
            block_size: block_size.max(1),
        }
    }
}

impl BlockReader for VecReader {
    fn read_block(&mut self) -> Result<Option<Vec<Posting>>> {
        if self.pos >= self.postings.len() {
            return Ok(None);
        }
        let end = (self.pos + self.block_size).min(self.postings.len());
        let block = self.postings[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(block))
    }
}
