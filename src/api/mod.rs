//! HTTP service exposing the index over JSON, or XML on request

mod handlers;
mod router;
pub mod types;

pub use handlers::{ApiError, ResponseFormat};
pub use router::{create_router, AppState};
