//! Mutable posting buffer for in-memory writes
//!
//! The buffer collects postings of recently added documents until they are
//! flushed to an immutable segment. Reading requires sealing: `seal()`
//! consumes the buffer, sorts it in place and hands back an immutable
//! `SealedBuffer` that readers borrow from.

use super::posting::{BlockReader, Posting};
use crate::error::Result;

/// In-memory buffer of (term, doc_id) postings for one mutable segment
#[derive(Clone, Debug, Default)]
pub struct PostingBuffer {
    /// Number of add operations minus successful deletes
    num_docs: usize,
    min_doc_id: u32,
    max_doc_id: u32,
    postings: Vec<Posting>,
}

impl PostingBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new buffer with pre-allocated posting capacity
    pub fn with_capacity(posting_capacity: usize) -> Self {
        Self {
            postings: Vec::with_capacity(posting_capacity),
            ..Self::default()
        }
    }

    pub fn document_count(&self) -> usize {
        self.num_docs
    }

    pub fn posting_count(&self) -> usize {
        self.postings.len()
    }

    /// Smallest document ID added, `None` when the buffer is empty
    pub fn min_doc_id(&self) -> Option<u32> {
        (self.num_docs > 0).then_some(self.min_doc_id)
    }

    /// Largest document ID added, `None` when the buffer is empty
    pub fn max_doc_id(&self) -> Option<u32> {
        (self.num_docs > 0).then_some(self.max_doc_id)
    }

    pub fn is_empty(&self) -> bool {
        self.num_docs == 0
    }

    /// Add one posting per term for `doc_id`
    pub fn add(&mut self, doc_id: u32, terms: &[u32]) {
        self.num_docs += 1;
        if self.num_docs == 1 || doc_id < self.min_doc_id {
            self.min_doc_id = doc_id;
        }
        if self.num_docs == 1 || doc_id > self.max_doc_id {
            self.max_doc_id = doc_id;
        }
        self.postings
            .extend(terms.iter().map(|&term| Posting::new(term, doc_id)));
    }

    /// Remove every posting of `doc_id`.
    ///
    /// Returns false if the document has no postings in this buffer.
    pub fn delete(&mut self, doc_id: u32) -> bool {
        if self.num_docs == 0 || doc_id < self.min_doc_id || doc_id > self.max_doc_id {
            return false;
        }

        let before = self.postings.len();
        self.postings.retain(|posting| posting.doc_id != doc_id);
        if self.postings.len() == before {
            return false;
        }

        self.num_docs -= 1;
        if doc_id == self.min_doc_id || doc_id == self.max_doc_id {
            self.recompute_bounds();
        }
        true
    }

    /// Clear all contents, keeping the allocated storage
    pub fn reset(&mut self) {
        self.num_docs = 0;
        self.min_doc_id = 0;
        self.max_doc_id = 0;
        self.postings.clear();
    }

    /// Sort the postings and freeze the buffer for reading
    pub fn seal(mut self) -> SealedBuffer {
        self.postings.sort_unstable();
        SealedBuffer { inner: self }
    }

    /// Sorted copy of the current contents; the buffer stays writable
    pub fn snapshot(&self) -> SealedBuffer {
        self.clone().seal()
    }

    /// Sorted copy of the postings whose term is in `terms`.
    ///
    /// `terms` must be sorted ascending.
    pub fn select(&self, terms: &[u32]) -> SealedBuffer {
        let mut selected = PostingBuffer {
            num_docs: self.num_docs,
            min_doc_id: self.min_doc_id,
            max_doc_id: self.max_doc_id,
            postings: Vec::new(),
        };
        selected.postings.extend(
            self.postings
                .iter()
                .filter(|posting| terms.binary_search(&posting.term).is_ok()),
        );
        selected.seal()
    }

    fn recompute_bounds(&mut self) {
        self.min_doc_id = 0;
        self.max_doc_id = 0;
        if self.num_docs == 0 {
            return;
        }

        let mut doc_ids = self.postings.iter().map(|posting| posting.doc_id);
        if let Some(first) = doc_ids.next() {
            let (min, max) = doc_ids.fold((first, first), |(min, max), doc_id| {
                (min.min(doc_id), max.max(doc_id))
            });
            self.min_doc_id = min;
            self.max_doc_id = max;
        }
    }
}

/// Immutable, sorted view of a posting buffer
#[derive(Clone, Debug)]
pub struct SealedBuffer {
    inner: PostingBuffer,
}

impl SealedBuffer {
    pub fn document_count(&self) -> usize {
        self.inner.document_count()
    }

    pub fn posting_count(&self) -> usize {
        self.inner.posting_count()
    }

    pub fn min_doc_id(&self) -> Option<u32> {
        self.inner.min_doc_id()
    }

    pub fn max_doc_id(&self) -> Option<u32> {
        self.inner.max_doc_id()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Postings in (term, doc_id) order
    pub fn postings(&self) -> &[Posting] {
        &self.inner.postings
    }

    /// Reader returning all postings as a single block
    pub fn reader(&self) -> BufferReader<'_> {
        BufferReader {
            postings: &self.inner.postings,
            pos: 0,
        }
    }

    /// Return to a writable buffer with the same contents
    pub fn unseal(self) -> PostingBuffer {
        self.inner
    }
}

/// Block reader over a sealed buffer
#[derive(Debug)]
pub struct BufferReader<'a> {
    postings: &'a [Posting],
    pos: usize,
}

impl BlockReader for BufferReader<'_> {
    fn read_block(&mut self) -> Result<Option<Vec<Posting>>> {
        if self.pos >= self.postings.len() {
            return Ok(None);
        }
        let block = self.postings[self.pos..].to_vec();
        self.pos = self.postings.len();
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::posting::read_all;

    fn p(term: u32, doc_id: u32) -> Posting {
        Posting::new(term, doc_id)
    }

    #[test]
    fn test_add_and_read() {
        let mut buffer = PostingBuffer::new();
        buffer.add(10, &[1, 2]);
        buffer.add(20, &[2, 3]);

        assert_eq!(buffer.document_count(), 2);
        assert_eq!(buffer.posting_count(), 4);
        assert_eq!(buffer.min_doc_id(), Some(10));
        assert_eq!(buffer.max_doc_id(), Some(20));

        let sealed = buffer.seal();
        let postings = read_all(&mut sealed.reader()).unwrap();
        assert_eq!(postings, vec![p(1, 10), p(2, 10), p(2, 20), p(3, 20)]);
    }

    #[test]
    fn test_reader_single_block() {
        let mut buffer = PostingBuffer::new();
        buffer.add(3, &[9, 1, 5]);
        let sealed = buffer.seal();

        let mut reader = sealed.reader();
        assert_eq!(reader.read_block().unwrap().unwrap().len(), 3);
        assert!(reader.read_block().unwrap().is_none());
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = PostingBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.min_doc_id(), None);
        assert_eq!(buffer.max_doc_id(), None);

        let sealed = buffer.seal();
        assert!(sealed.reader().read_block().unwrap().is_none());
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut buffer = PostingBuffer::new();
        buffer.add(1, &[7, 7]);
        buffer.add(1, &[7]);
        assert_eq!(buffer.document_count(), 2);
        assert_eq!(buffer.seal().postings(), &[p(7, 1), p(7, 1), p(7, 1)]);
    }

    #[test]
    fn test_delete_missing_doc() {
        let mut buffer = PostingBuffer::new();
        buffer.add(10, &[1]);
        buffer.add(30, &[2]);

        // out of range
        assert!(!buffer.delete(5));
        assert!(!buffer.delete(31));
        // in range but absent
        assert!(!buffer.delete(20));

        assert_eq!(buffer.document_count(), 2);
        assert_eq!(buffer.posting_count(), 2);
        assert_eq!(buffer.min_doc_id(), Some(10));
        assert_eq!(buffer.max_doc_id(), Some(30));
    }

    #[test]
    fn test_delete_recomputes_bounds() {
        let mut buffer = PostingBuffer::new();
        buffer.add(10, &[1, 2]);
        buffer.add(20, &[1]);
        buffer.add(30, &[3]);

        assert!(buffer.delete(30));
        assert_eq!(buffer.max_doc_id(), Some(20));
        assert_eq!(buffer.min_doc_id(), Some(10));

        assert!(buffer.delete(10));
        assert_eq!(buffer.min_doc_id(), Some(20));
        assert_eq!(buffer.max_doc_id(), Some(20));
        assert_eq!(buffer.document_count(), 1);
        assert_eq!(buffer.posting_count(), 1);

        assert!(buffer.delete(20));
        assert!(buffer.is_empty());
        assert_eq!(buffer.min_doc_id(), None);
        assert_eq!(buffer.max_doc_id(), None);
    }

    #[test]
    fn test_delete_middle_keeps_bounds() {
        let mut buffer = PostingBuffer::new();
        buffer.add(10, &[1]);
        buffer.add(20, &[1]);
        buffer.add(30, &[1]);

        assert!(buffer.delete(20));
        assert_eq!(buffer.min_doc_id(), Some(10));
        assert_eq!(buffer.max_doc_id(), Some(30));
    }

    #[test]
    fn test_bounds_after_mixed_operations() {
        let mut buffer = PostingBuffer::new();
        let ops: &[(bool, u32)] = &[
            (true, 50),
            (true, 7),
            (true, 99),
            (false, 7),
            (true, 3),
            (false, 99),
            (false, 50),
            (true, 120),
            (false, 3),
        ];
        for &(add, doc_id) in ops {
            if add {
                buffer.add(doc_id, &[doc_id % 5, doc_id % 7]);
            } else {
                assert!(buffer.delete(doc_id));
            }
            assert_eq!(buffer.is_empty(), buffer.document_count() == 0);
            if let (Some(min), Some(max)) = (buffer.min_doc_id(), buffer.max_doc_id()) {
                assert!(min <= max);
            }
        }
        assert_eq!(buffer.min_doc_id(), Some(120));
        assert_eq!(buffer.max_doc_id(), Some(120));
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut buffer = PostingBuffer::with_capacity(16);
        buffer.add(1, &[1, 2, 3]);
        buffer.reset();

        assert!(buffer.is_empty());
        assert_eq!(buffer.posting_count(), 0);
        assert!(buffer.postings.capacity() >= 16);
    }

    #[test]
    fn test_unseal_and_reseal() {
        let mut buffer = PostingBuffer::new();
        buffer.add(2, &[5]);
        let mut buffer = buffer.seal().unseal();
        buffer.add(1, &[4, 6]);

        let sealed = buffer.seal();
        assert_eq!(sealed.postings(), &[p(4, 1), p(5, 2), p(6, 1)]);
    }

    #[test]
    fn test_snapshot_and_select() {
        let mut buffer = PostingBuffer::new();
        buffer.add(1, &[30, 10, 20]);
        buffer.add(2, &[20, 40]);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.posting_count(), 5);
        assert!(snapshot.postings().windows(2).all(|w| w[0] <= w[1]));

        let selected = buffer.select(&[20, 40]);
        assert_eq!(selected.postings(), &[p(20, 1), p(20, 2), p(40, 2)]);

        // the source buffer is untouched
        assert_eq!(buffer.posting_count(), 5);
    }
}
