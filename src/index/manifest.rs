//! Index manifest: the list of live segments and their tombstones
//!
//! The manifest is the commit point of the index. Segment files not listed
//! here are garbage, and a segment only becomes visible once a manifest
//! naming it has been committed.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::segment::{segment_file_name, SegmentInfo};
use crate::error::Result;
use crate::vfs::{is_not_found, FileSystem};

/// File name of the manifest inside the index directory
pub const MANIFEST_FILE: &str = "index.manifest";

/// Manifest entry for one segment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub id: u64,
    pub name: String,
    pub doc_count: u64,
    pub item_count: u64,
    pub min_doc_id: Option<u32>,
    pub max_doc_id: Option<u32>,
    pub block_count: u32,
    pub checksum: u32,
    /// Documents deleted after the segment was written
    #[serde(default)]
    pub deleted: Vec<u32>,
}

impl SegmentEntry {
    pub fn new(id: u64, info: &SegmentInfo) -> Self {
        Self {
            id,
            name: segment_file_name(id),
            doc_count: info.doc_count,
            item_count: info.posting_count,
            min_doc_id: info.min_doc_id,
            max_doc_id: info.max_doc_id,
            block_count: info.block_count,
            checksum: info.checksum,
            deleted: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Format version
    pub version: u32,
    /// Incremented on every commit
    pub generation: u64,
    pub next_segment_id: u64,
    pub segments: Vec<SegmentEntry>,
    /// Unix seconds of the last commit
    pub updated_at: u64,
}

impl Default for IndexManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManifest {
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            next_segment_id: 1,
            segments: Vec::new(),
            updated_at: 0,
        }
    }

    /// Load the manifest from `fs`; a missing manifest is an empty index
    pub fn load(fs: &dyn FileSystem) -> Result<Self> {
        match fs.read_file(MANIFEST_FILE) {
            Ok(data) => Self::from_json(&data),
            Err(e) if is_not_found(&e) => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    /// Bump the generation and atomically replace the manifest file
    pub fn save(&mut self, fs: &dyn FileSystem) -> Result<()> {
        let previous = (self.generation, self.updated_at);
        self.generation += 1;
        self.updated_at = current_timestamp();

        let result = self.write_to(fs);
        if result.is_err() {
            (self.generation, self.updated_at) = previous;
        }
        result
    }

    fn write_to(&self, fs: &dyn FileSystem) -> Result<()> {
        let data = self.to_json()?;
        let mut file = fs.create_atomic_file(MANIFEST_FILE)?;
        file.write_all(&data)?;
        file.commit()
    }

    pub fn allocate_segment_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    pub fn total_item_count(&self) -> u64 {
        self.segments.iter().map(|e| e.item_count).sum()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
