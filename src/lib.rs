pub mod api;
pub mod chromaprint;
pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod vfs;

pub use api::{create_router, AppState};
pub use chromaprint::Fingerprint;
pub use config::{IndexSettings, ServerConfig};
pub use error::{FpIndexError, Result};
pub use index::{Index, IndexStats, SearchHit};
pub use metrics::IndexMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
