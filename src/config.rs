use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index settings configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Flush the in-memory buffer once it holds this many postings
    pub max_buffer_postings: usize,
    /// Flush the in-memory buffer once this many documents were added
    pub max_buffer_documents: usize,
    /// Number of postings per persisted segment block
    pub segment_block_size: usize,
    /// Compact all segments into one when there are more than this
    pub max_segments: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            max_buffer_postings: 1_000_000,
            max_buffer_documents: 50_000,
            segment_block_size: 1024,
            max_segments: 10,
        }
    }
}

impl IndexSettings {
    pub fn with_max_buffer_postings(mut self, postings: usize) -> Self {
        self.max_buffer_postings = postings;
        self
    }

    pub fn with_max_buffer_documents(mut self, documents: usize) -> Self {
        self.max_buffer_documents = documents;
        self
    }

    pub fn with_segment_block_size(mut self, block_size: usize) -> Self {
        self.segment_block_size = block_size.max(1);
        self
    }

    pub fn with_max_segments(mut self, segments: usize) -> Self {
        self.max_segments = segments.max(1);
        self
    }
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub index: IndexSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:6080".to_string(),
            data_dir: PathBuf::from("./data"),
            index: IndexSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind_addr: String, data_dir: PathBuf) -> Self {
        Self {
            bind_addr,
            data_dir,
            ..Default::default()
        }
    }

    /// Replace the index settings
    pub fn with_index_settings(mut self, index: IndexSettings) -> Self {
        self.index = index;
        self
    }
}
