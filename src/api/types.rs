use serde::{Deserialize, Serialize};

use crate::index::{IndexStats, SearchHit};

/// Query parameters accepted by every endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatParams {
    /// Response format, only "json" is supported
    #[serde(default)]
    pub format: Option<String>,
}

/// Search request
///
/// Query terms can be given directly, as an encoded fingerprint, or both:
/// ```json
/// { "fingerprint": "AQAAA0mUaEkSRZEGAA", "limit": 5 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub terms: Vec<u32>,
    /// Base64 text form of a compressed fingerprint
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Maximum number of results, 0 for all
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: u32,
    pub hits: u32,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.doc_id,
            hits: hit.hits,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: String,
    pub results: Vec<SearchResult>,
}

/// Document to insert; `terms` and `fingerprint` are combined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertDocument {
    pub id: u32,
    #[serde(default)]
    pub terms: Option<Vec<u32>>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertRequest {
    pub docs: Vec<InsertDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertResponse {
    pub status: String,
    pub inserted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub status: String,
    #[serde(flatten)]
    pub stats: IndexStats,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    pub code: u16,
}

/// API error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        Self {
            status: "error".to_string(),
            error: ErrorDetails {
                message: message.into(),
                code,
            },
        }
    }
}

pub(crate) fn ok() -> String {
    "ok".to_string()
}
