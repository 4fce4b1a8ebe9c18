//! Error types for the ingest pipeline.
//!
//! All errors implement `std::error::Error` and carry enough structured context
//! to decide whether a caller should retry.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: no peer within the accept timeout, refused or
//!   unreachable connects
//! - **I/O Errors**: a single send/receive failure on an established link
//! - **Format Errors**: a frame that cannot be decoded (see [`FormatError`])
//! - **Store Errors**: oversized write batches, a second writer
//! - **Configuration Errors**: unreadable or invalid pipeline configuration
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use phms::IngestError;
//!
//! let error = IngestError::connection_failed("no peer listening");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::Field;

/// Result type alias for ingest operations.
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Main error type for ingest operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IngestError {
    #[error("Failed to connect: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No peer connected within {duration:?}")]
    AcceptTimeout { duration: Duration },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Write of {requested} readings rejected: store capacity is {capacity}")]
    CapacityRejected { requested: usize, capacity: usize },

    #[error("The ring store writer has already been taken")]
    WriterTaken,

    #[error("{role} is not connected")]
    NotConnected { role: &'static str },

    #[error("{what} is closed")]
    Closed { what: &'static str },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Configuration file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed")]
    Task {
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Errors raised while encoding or decoding frames.
///
/// Fields are variable-presence and carry no length prefix, so the decoder
/// cannot resynchronise after any of these: the whole frame is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormatError {
    #[error("Unrecognized field tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Field {field:?} at offset {offset} needs {needed} bytes, {remaining} remaining")]
    Truncated { field: Field, offset: usize, needed: usize, remaining: usize },

    #[error("Field {field:?} at offset {offset} appears before any timestamp")]
    MissingTimestamp { field: Field, offset: usize },

    #[error("Reading {index} carries no measurements")]
    EmptyReading { index: usize },

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Compact frame ends with a partial {remaining} byte sample group")]
    CompactTruncated { remaining: usize },
}

impl IngestError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Connection { .. } => true,
            IngestError::AcceptTimeout { .. } => true,
            IngestError::Io { .. } => true,
            IngestError::Format(_) => false,
            IngestError::CapacityRejected { .. } => false,
            IngestError::WriterTaken => false,
            IngestError::NotConnected { .. } => false,
            IngestError::Closed { .. } => false,
            IngestError::Config { .. } => false,
            IngestError::File { .. } => false,
            IngestError::Task { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            IngestError::Connection { .. } => vec![
                "Check that the sensor device is powered and in range",
                "Verify the peer address and channel",
                "Retry with a larger try budget",
            ],
            IngestError::AcceptTimeout { .. } => vec![
                "Start the remote device before opening the link",
                "Increase the accept timeout",
            ],
            IngestError::Io { .. } => vec![
                "The link usually recovers on its own",
                "Reopen the connection if errors persist",
            ],
            IngestError::Format(_) => vec![
                "Check that both ends agree on the wire format",
                "Drop the malformed frame and continue",
            ],
            IngestError::CapacityRejected { .. } => {
                vec!["Split the batch into chunks no larger than the store capacity"]
            }
            IngestError::WriterTaken => {
                vec!["Pass the existing writer to the single producer thread"]
            }
            IngestError::NotConnected { .. } => vec!["Call open() and check its result first"],
            IngestError::Closed { .. } => vec!["Recreate the pipeline"],
            IngestError::Config { .. } => vec![
                "Check configuration values against the documented ranges",
                "Remove the key to fall back to the default",
            ],
            IngestError::File { .. } => {
                vec!["Check the configuration file exists and is readable"]
            }
            IngestError::Task { .. } => vec!["Check logs for a panic in the background task"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        IngestError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        IngestError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for transient I/O errors.
    pub fn io_error(context: impl Into<String>, source: std::io::Error) -> Self {
        IngestError::Io { context: context.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        IngestError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for a role used before a successful open.
    pub fn not_connected(role: &'static str) -> Self {
        IngestError::NotConnected { role }
    }

    /// Helper constructor for a closed channel or handle.
    pub fn closed(what: &'static str) -> Self {
        IngestError::Closed { what }
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(source: tokio::task::JoinError) -> Self {
        IngestError::Task { source }
    }
}
