use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::api::types::*;
use crate::chromaprint::Fingerprint;
use crate::error::FpIndexError;

use super::router::AppState;

/// Error wrapper for API handlers
#[derive(Debug)]
pub enum ApiError {
    Index(FpIndexError),
    BadRequest(String),
}

impl From<FpIndexError> for ApiError {
    fn from(e: FpIndexError) -> Self {
        ApiError::Index(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Index(FpIndexError::InvalidFingerprint(_))
            | ApiError::Index(FpIndexError::InvalidRequest(_))
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Index(FpIndexError::Locked(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    fn respond(self, format: ResponseFormat) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Index(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", message);
        }

        format.respond(status, &ErrorResponse::new(message, status.as_u16()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.respond(ResponseFormat::Json)
    }
}

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Response encoding selected by the `format` query parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
}

impl ResponseFormat {
    pub fn from_params(params: &FormatParams) -> Result<Self, ApiError> {
        match params.format.as_deref() {
            None | Some("") | Some("json") => Ok(Self::Json),
            Some("xml") => Ok(Self::Xml),
            Some(other) => Err(ApiError::BadRequest(format!("unknown format {}", other))),
        }
    }

    /// Content type and body bytes
    fn encode<T: Serialize>(self, body: &T) -> Result<(&'static str, Vec<u8>), String> {
        match self {
            Self::Json => {
                let data = serde_json::to_vec(body).map_err(|e| e.to_string())?;
                Ok(("application/json", data))
            }
            Self::Xml => {
                let xml = quick_xml::se::to_string_with_root("response", body)
                    .map_err(|e| e.to_string())?;
                let data = format!("{}{}", XML_HEADER, xml).into_bytes();
                Ok(("application/xml; charset=utf-8", data))
            }
        }
    }

    fn respond<T: Serialize>(self, status: StatusCode, body: &T) -> Response {
        match self.encode(body) {
            Ok((content_type, data)) => {
                (status, [(header::CONTENT_TYPE, content_type)], data).into_response()
            }
            Err(e) => {
                warn!("Failed to encode response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Run a handler body and encode its outcome in the requested format
fn reply<T, F>(params: &FormatParams, run: F) -> Response
where
    T: Serialize,
    F: FnOnce() -> Result<T, ApiError>,
{
    let format = match ResponseFormat::from_params(params) {
        Ok(format) => format,
        Err(e) => return e.into_response(),
    };
    match run() {
        Ok(body) => format.respond(StatusCode::OK, &body),
        Err(e) => e.respond(format),
    }
}

/// Explicit terms followed by the hashes of the decoded fingerprint
fn collect_terms(mut terms: Vec<u32>, fingerprint: Option<&str>) -> Result<Vec<u32>, ApiError> {
    if let Some(text) = fingerprint {
        let fingerprint = Fingerprint::decode_str(text)?;
        terms.extend(fingerprint.hashes);
    }
    Ok(terms)
}

fn refresh_gauges(state: &AppState) {
    let stats = state.index.read().stats();
    state
        .metrics
        .set_index_state(stats.segment_count, stats.buffer_postings);
}

/// Search for documents matching the given terms or fingerprint
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FormatParams>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    reply(&params, || {
        let Json(req) = payload?;
        let start = Instant::now();

        let result = collect_terms(req.terms, req.fingerprint.as_deref())
            .and_then(|terms| Ok(state.index.read().search(&terms, req.limit)?));
        let hits = match result {
            Ok(hits) => hits,
            Err(e) => {
                state.metrics.record_search_error();
                return Err(e);
            }
        };
        state.metrics.record_search(start.elapsed().as_secs_f64());

        Ok(SearchResponse {
            status: ok(),
            results: hits.into_iter().map(SearchResult::from).collect(),
        })
    })
}

/// Insert or replace documents
pub async fn insert(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FormatParams>,
    payload: Result<Json<InsertRequest>, JsonRejection>,
) -> Response {
    reply(&params, || {
        let Json(req) = payload?;

        // decode everything before touching the index
        let mut docs = Vec::with_capacity(req.docs.len());
        for doc in req.docs {
            if doc.terms.is_none() && doc.fingerprint.is_none() {
                return Err(ApiError::BadRequest(format!(
                    "document {} has neither terms nor a fingerprint",
                    doc.id
                )));
            }
            let terms =
                collect_terms(doc.terms.unwrap_or_default(), doc.fingerprint.as_deref())?;
            docs.push((doc.id, terms));
        }

        let inserted = state.index.write().insert_many(docs)?;
        state.metrics.record_inserts(inserted);
        refresh_gauges(&state);

        Ok(InsertResponse {
            status: ok(),
            inserted,
        })
    })
}

/// Persist the in-memory buffer
pub async fn flush(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FormatParams>,
) -> Response {
    reply(&params, || {
        state.index.write().flush()?;
        state.metrics.record_flush();
        refresh_gauges(&state);

        Ok(StatusResponse { status: ok() })
    })
}

/// Index statistics
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FormatParams>,
) -> Response {
    reply(&params, || {
        let stats = state.index.read().stats();
        Ok(StatsResponse {
            status: ok(),
            stats,
        })
    })
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = state.metrics.registry().gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| FpIndexError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    ))
}
