use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::buffer::PostingBuffer;
use super::manifest::{IndexManifest, SegmentEntry};
use super::merge::merge_readers;
use super::posting::BlockReader;
use super::segment::{segment_file_name, SegmentReader, SegmentWriter};
use crate::config::IndexSettings;
use crate::error::Result;
use crate::vfs::{FileSystem, LocalFileSystem, LockGuard};

/// Name of the lock file guarding an index directory
pub const LOCK_FILE: &str = "index.lock";

const SEGMENT_SUFFIX: &str = ".fpseg";

/// Document matched by a search, with the number of matching postings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub hits: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub buffer_documents: usize,
    pub buffer_postings: usize,
    pub segment_count: usize,
    pub segment_postings: u64,
    pub deleted_documents: u64,
    pub generation: u64,
}

/// Opened segment together with its tombstones
struct Segment {
    reader: SegmentReader,
    deleted: RoaringBitmap,
}

/// Fingerprint index: an in-memory buffer in front of immutable segments.
///
/// Segments and their tombstones are listed in the manifest. The index
/// directory is locked for as long as the `Index` is alive.
pub struct Index {
    fs: Arc<dyn FileSystem>,
    _lock: Box<dyn LockGuard>,
    settings: IndexSettings,
    manifest: IndexManifest,
    /// Parallel to `manifest.segments`
    segments: Vec<Segment>,
    buffer: PostingBuffer,
    /// Tombstones not yet written to the manifest
    dirty: bool,
}

impl Index {
    /// Open the index stored in `fs`, creating an empty one if needed
    pub fn open(fs: Arc<dyn FileSystem>, settings: IndexSettings) -> Result<Self> {
        let lock = fs.lock(LOCK_FILE)?;
        let manifest = IndexManifest::load(&*fs)?;

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for entry in &manifest.segments {
            let reader = SegmentReader::open(fs.clone(), &entry.name)?;
            let deleted = entry.deleted.iter().copied().collect();
            segments.push(Segment { reader, deleted });
        }

        let index = Self {
            fs,
            _lock: lock,
            settings,
            manifest,
            segments,
            buffer: PostingBuffer::new(),
            dirty: false,
        };
        index.remove_orphan_segments();

        info!(
            "Opened index at {} (generation {}, {} segments)",
            index.fs.path().display(),
            index.manifest.generation,
            index.segments.len()
        );
        Ok(index)
    }

    /// Open the index in a local directory
    pub fn open_dir(path: impl AsRef<Path>, settings: IndexSettings) -> Result<Self> {
        let fs = LocalFileSystem::open(path)?;
        Self::open(Arc::new(fs), settings)
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Add a document, replacing any earlier version of it.
    ///
    /// The buffer is flushed once it reaches the configured limits. A failed
    /// automatic flush is logged and leaves the document buffered; the flush
    /// is retried on the next insert and `flush` reports the error.
    pub fn insert(&mut self, doc_id: u32, terms: &[u32]) -> Result<()> {
        self.delete(doc_id);
        self.buffer.add(doc_id, terms);
        self.maybe_flush();
        Ok(())
    }

    /// Insert several documents, returns how many were inserted
    pub fn insert_many<I, T>(&mut self, docs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (u32, T)>,
        T: AsRef<[u32]>,
    {
        let mut count = 0;
        for (doc_id, terms) in docs {
            self.insert(doc_id, terms.as_ref())?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove a document from the buffer and mark it deleted in every
    /// segment that holds it. Returns false if the document was not live.
    ///
    /// Segment tombstones are persisted with the next commit.
    pub fn delete(&mut self, doc_id: u32) -> bool {
        let mut removed = self.buffer.delete(doc_id);
        for segment in &mut self.segments {
            if segment.reader.contains_doc(doc_id) && segment.deleted.insert(doc_id) {
                self.dirty = true;
                removed = true;
            }
        }
        removed
    }

    /// Find documents sharing terms with the query.
    ///
    /// Results are ordered by hit count (descending) then document ID.
    /// A `limit` of 0 returns every match.
    pub fn search(&self, terms: &[u32], limit: usize) -> Result<Vec<SearchHit>> {
        let mut query = terms.to_vec();
        query.sort_unstable();
        query.dedup();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let selected = self.buffer.select(&query);
        let mut readers: Vec<Box<dyn BlockReader + '_>> =
            Vec::with_capacity(self.segments.len() + 1);
        readers.push(Box::new(selected.reader()));
        for segment in &self.segments {
            readers.push(Box::new(
                segment.reader.reader_for_terms(&query, &segment.deleted)?,
            ));
        }

        let mut counts: HashMap<u32, u32> = HashMap::new();
        let mut merged = merge_readers(readers);
        while let Some(block) = merged.read_block()? {
            for posting in block {
                *counts.entry(posting.doc_id).or_insert(0) += 1;
            }
        }

        let mut hits: Vec<SearchHit> = counts
            .into_iter()
            .map(|(doc_id, hits)| SearchHit { doc_id, hits })
            .collect();
        hits.sort_unstable_by(|a, b| b.hits.cmp(&a.hits).then(a.doc_id.cmp(&b.doc_id)));
        if limit > 0 {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    /// Write the buffer to a new segment and commit the manifest.
    ///
    /// On failure the buffer keeps its contents so the flush can be retried.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.posting_count() == 0 {
            self.buffer.reset();
            return self.commit_if_dirty();
        }

        let sealed = std::mem::take(&mut self.buffer).seal();
        let id = self.manifest.allocate_segment_id();
        let name = segment_file_name(id);

        let written = SegmentWriter::new(self.settings.segment_block_size)
            .write(&*self.fs, &name, &mut sealed.reader())
            .and_then(|info| Ok((info, SegmentReader::open(self.fs.clone(), &name)?)));
        let (info, reader) = match written {
            Ok(written) => written,
            Err(e) => {
                warn!("Failed to write segment {}: {}", name, e);
                self.buffer = sealed.unseal();
                self.remove_file(&name);
                return Err(e);
            }
        };

        self.manifest.segments.push(SegmentEntry::new(id, &info));
        self.segments.push(Segment {
            reader,
            deleted: RoaringBitmap::new(),
        });
        if let Err(e) = self.commit() {
            self.manifest.segments.pop();
            self.segments.pop();
            self.buffer = sealed.unseal();
            self.remove_file(&name);
            return Err(e);
        }

        info!(
            "Flushed {} postings of {} documents to {}",
            info.posting_count, info.doc_count, name
        );
        self.buffer = sealed.unseal();
        self.buffer.reset();

        if self.segments.len() > self.settings.max_segments {
            self.compact()?;
        }
        Ok(())
    }

    /// Merge all segments into one, dropping deleted documents
    pub fn compact(&mut self) -> Result<()> {
        let has_deletes = self.segments.iter().any(|s| !s.deleted.is_empty());
        if self.segments.len() < 2 && !has_deletes {
            return Ok(());
        }

        let id = self.manifest.allocate_segment_id();
        let name = segment_file_name(id);

        let written = {
            let mut readers: Vec<Box<dyn BlockReader + '_>> =
                Vec::with_capacity(self.segments.len());
            for segment in &self.segments {
                readers.push(Box::new(segment.reader.reader(&segment.deleted)?));
            }
            let mut merged = merge_readers(readers);
            SegmentWriter::new(self.settings.segment_block_size)
                .write(&*self.fs, &name, &mut merged)
                .and_then(|info| Ok((info, SegmentReader::open(self.fs.clone(), &name)?)))
        };
        let (info, reader) = match written {
            Ok(written) => written,
            Err(e) => {
                warn!("Compaction into {} failed: {}", name, e);
                self.remove_file(&name);
                return Err(e);
            }
        };

        let (new_entries, new_segments) = if info.posting_count == 0 {
            self.remove_file(&name);
            (Vec::new(), Vec::new())
        } else {
            let segment = Segment {
                reader,
                deleted: RoaringBitmap::new(),
            };
            (vec![SegmentEntry::new(id, &info)], vec![segment])
        };
        let old_entries = std::mem::replace(&mut self.manifest.segments, new_entries);
        let old_segments = std::mem::replace(&mut self.segments, new_segments);

        if let Err(e) = self.commit() {
            self.manifest.segments = old_entries;
            self.segments = old_segments;
            self.remove_file(&name);
            return Err(e);
        }

        info!(
            "Compacted {} segments into {} ({} postings)",
            old_entries.len(),
            name,
            info.posting_count
        );
        drop(old_segments);
        for entry in &old_entries {
            self.remove_file(&entry.name);
        }
        Ok(())
    }

    /// Write the manifest, including all pending tombstones
    pub fn commit(&mut self) -> Result<()> {
        for (entry, segment) in self.manifest.segments.iter_mut().zip(&self.segments) {
            entry.deleted = segment.deleted.iter().collect();
        }
        self.manifest.save(&*self.fs)?;
        self.dirty = false;
        debug!("Committed manifest generation {}", self.manifest.generation);
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            buffer_documents: self.buffer.document_count(),
            buffer_postings: self.buffer.posting_count(),
            segment_count: self.segments.len(),
            segment_postings: self.manifest.total_item_count(),
            deleted_documents: self.segments.iter().map(|s| s.deleted.len()).sum(),
            generation: self.manifest.generation,
        }
    }

    /// Flush the buffer and release the index lock
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn maybe_flush(&mut self) {
        if self.buffer.posting_count() >= self.settings.max_buffer_postings
            || self.buffer.document_count() >= self.settings.max_buffer_documents
        {
            if let Err(e) = self.flush() {
                warn!(
                    "Automatic flush of {} buffered documents failed: {}",
                    self.buffer.document_count(),
                    e
                );
            }
        }
    }

    fn commit_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            self.commit()?;
        }
        Ok(())
    }

    fn remove_file(&self, name: &str) {
        if self.fs.exists(name) {
            if let Err(e) = self.fs.remove(name) {
                warn!("Failed to remove {}: {}", name, e);
            }
        }
    }

    /// Delete segment files left behind by failed flushes or compactions
    fn remove_orphan_segments(&self) {
        let names = match self.fs.list() {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list index files: {}", e);
                return;
            }
        };
        for name in names {
            let live = self.manifest.segments.iter().any(|e| e.name == name);
            if name.ends_with(SEGMENT_SUFFIX) && !live {
                debug!("Removing orphan segment {}", name);
                self.remove_file(&name);
            }
        }
    }
}
