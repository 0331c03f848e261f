//! Error Types
//!
//! This module defines the error types used throughout the texturing
//! pipeline.
//!
//! # Overview
//!
//! The main error type [`RegolithError`] covers all failure modes including:
//! - Contradictory or unsupported configuration
//! - Missing prerequisites (mesh, observations, tile list)
//! - Raster and mesh validation errors
//! - Solver and I/O failures
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, RegolithError>`.
//!
//! Per-item failures (a single observation failing to mask, stretch, blur
//! or blend; a single leaf failing to re-render) are *not* surfaced through
//! this type at the pipeline level: they are logged, counted, and recovered
//! locally. Only configuration errors and missing prerequisites are fatal.

use thiserror::Error;

/// The main error type for the texturing pipeline.
///
/// Each variant provides specific context about what went wrong.
#[derive(Error, Debug)]
pub enum RegolithError {
    // ========================================================================
    // Configuration Errors (fatal at startup)
    // ========================================================================
    /// Contradictory or out-of-range options.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An observation-selection strategy name that is not implemented.
    #[error("Unsupported observation selection strategy: {0}")]
    UnsupportedStrategy(String),

    // ========================================================================
    // Missing Prerequisites (fatal at the requesting stage)
    // ========================================================================
    /// A stage was invoked without a required input.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// The requested frame is not known to the frame cache.
    #[error("Unknown frame: {0}")]
    UnknownFrame(String),

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// Raster construction or access error.
    #[error("Raster error: {0}")]
    Raster(String),

    /// Mesh or LOD pyramid validation error.
    #[error("Mesh error: {0}")]
    Mesh(String),

    /// Image encoding or decoding error.
    #[error("Image codec error: {0}")]
    ImageCodec(String),

    // ========================================================================
    // Store & I/O Errors
    // ========================================================================
    /// A data product id that is not present in the store.
    #[error("Product not found: {0}")]
    ProductNotFound(uuid::Uuid),

    /// A data product of an unexpected kind was fetched.
    #[error("Product kind mismatch for {id}: expected {expected}")]
    ProductKindMismatch {
        /// The offending product id.
        id: uuid::Uuid,
        /// Description of the expected kind.
        expected: &'static str,
    },

    /// File I/O error, with the offending path.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// The multigrid solver failed outright (as opposed to merely not
    /// converging, which is logged and returns the best iterate).
    #[error("Solver error: {0}")]
    Solver(String),

    /// The worker pool could not be constructed.
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// The pipeline was cancelled between stages.
    #[error("Cancelled before stage {0}")]
    Cancelled(&'static str),
}

impl From<image::ImageError> for RegolithError {
    fn from(err: image::ImageError) -> Self {
        RegolithError::ImageCodec(err.to_string())
    }
}

impl RegolithError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        RegolithError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Alias for `Result<T, RegolithError>`.
pub type Result<T> = std::result::Result<T, RegolithError>;
