//! Inverted index over fingerprint terms
//!
//! - `PostingBuffer`: mutable in-memory postings, sealed before reading
//! - `BlockReader`: block-at-a-time source of sorted postings
//! - `MergeReader`: balanced binary merge of many block readers
//! - `SegmentWriter` / `SegmentReader`: immutable on-disk segments
//! - `Index`: buffer, segments and manifest tied together

mod buffer;
#[allow(clippy::module_inception)]
mod index;
mod manifest;
mod merge;
mod posting;
mod segment;

pub use buffer::{BufferReader, PostingBuffer, SealedBuffer};
pub use index::{Index, IndexStats, SearchHit, LOCK_FILE};
pub use manifest::{IndexManifest, SegmentEntry, MANIFEST_FILE};
pub use merge::{merge_readers, MergeNode, MergeReader, MERGE_BLOCK_SIZE};
pub use posting::{read_all, BlockReader, Posting, VecReader};
pub use segment::{
    segment_file_name, SegmentBlockReader, SegmentInfo, SegmentReader, SegmentWriter,
};
