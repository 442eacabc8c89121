//! Error handling for the tagging core
//!
//! This module provides:
//! - `TaggerError`, the typed error returned by core operations
//! - Error codes with categories and retry hints
//! - Process-wide error counters for telemetry

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// ERROR CODES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Taxonomy has no external id alias and cannot be loaded
    MissingAlias,
    /// A capability provider call failed
    ProviderFailure,
    /// Dimension id not managed by this session
    UnknownDimension,
    /// Tree node id not present in the dimension's tree
    UnknownNode,
    /// Mutation attempted on a read-only session
    ReadOnly,
    /// Session has been torn down
    Destroyed,
    /// Completion belongs to a superseded load cycle
    Stale,
    /// Invalid configuration
    InvalidConfig,
}

impl ErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ProviderFailure | ErrorCode::Stale)
    }

    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::MissingAlias | ErrorCode::InvalidConfig => "configuration",
            ErrorCode::ProviderFailure => "provider",
            ErrorCode::UnknownDimension | ErrorCode::UnknownNode => "not_found",
            ErrorCode::ReadOnly => "permission",
            ErrorCode::Destroyed | ErrorCode::Stale => "lifecycle",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// TAGGER ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaggerError {
    #[error(
        "taxonomy '{taxonomy_id}' does not have an external content id and is not usable as a taxonomy"
    )]
    MissingAlias { taxonomy_id: String },

    #[error("{operation} failed for '{id}': {source}")]
    Provider {
        operation: &'static str,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("dimension '{0}' is not managed by this session")]
    UnknownDimension(String),

    #[error("node {node} not found in tree of dimension '{dimension_id}'")]
    UnknownNode { dimension_id: String, node: usize },

    #[error("session is read-only")]
    ReadOnly,

    #[error("session has been destroyed")]
    Destroyed,

    #[error("completion belongs to a superseded load cycle")]
    Stale,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TaggerError {
    pub fn provider(operation: &'static str, id: impl Into<String>, source: anyhow::Error) -> Self {
        TaggerError::Provider {
            operation,
            id: id.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TaggerError::MissingAlias { .. } => ErrorCode::MissingAlias,
            TaggerError::Provider { .. } => ErrorCode::ProviderFailure,
            TaggerError::UnknownDimension(_) => ErrorCode::UnknownDimension,
            TaggerError::UnknownNode { .. } => ErrorCode::UnknownNode,
            TaggerError::ReadOnly => ErrorCode::ReadOnly,
            TaggerError::Destroyed => ErrorCode::Destroyed,
            TaggerError::Stale => ErrorCode::Stale,
            TaggerError::Config(_) => ErrorCode::InvalidConfig,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Record this error in the process-wide counters.
    pub fn track(&self, operation: &str) {
        ERROR_METRICS.record_error(&self.code(), Some(operation));
    }
}

pub type TaggerResult<T> = std::result::Result<T, TaggerError>;

// =============================================================================
// ERROR METRICS
// =============================================================================

pub struct ErrorMetrics {
    error_counts: RwLock<HashMap<ErrorCode, AtomicU64>>,
    operation_errors: RwLock<HashMap<String, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            error_counts: RwLock::new(HashMap::new()),
            operation_errors: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_error(&self, code: &ErrorCode, operation: Option<&str>) {
        {
            let map = self.error_counts.read();
            if let Some(counter) = map.get(code) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(map);
                self.error_counts
                    .write()
                    .entry(*code)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(operation) = operation {
            let map = self.operation_errors.read();
            if let Some(counter) = map.get(operation) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(map);
                self.operation_errors
                    .write()
                    .entry(operation.to_string())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self, code: &ErrorCode) -> u64 {
        self.error_counts
            .read()
            .get(code)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn operation_count(&self, operation: &str) -> u64 {
        self.operation_errors
            .read()
            .get(operation)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);
