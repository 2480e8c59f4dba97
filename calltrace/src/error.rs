//! Error types.
//!
//! Tracing failures ([`TraceError`]) are swallowed and logged by
//! [`Tracer::begin`](crate::Tracer::begin) and
//! [`Tracer::end`](crate::Tracer::end); they only reach callers through the
//! `try_` variants. Export and import failures are always returned.

use std::path::PathBuf;

use thiserror::Error;

/// A tracing operation that could not be applied to the call tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// No frame outside the engine was found on the calling thread's stack.
    #[error("no caller frame outside the tracer could be resolved")]
    UnresolvedCaller,
    /// `end` was called on a thread with no open call.
    #[error("thread {thread_id} has no open call to end")]
    UnmatchedEnd {
        /// Tracer-assigned id of the calling thread.
        thread_id: u64,
    },
}

/// Writing a trace document failed.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The output file or its directory could not be written.
    #[error("failed to write trace document to {}: {source}", path.display())]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// XML serialisation failed.
    #[error("failed to encode trace document as XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// JSON serialisation failed.
    #[error("failed to encode trace document as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reading a trace document failed.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The input file could not be read.
    #[error("failed to read trace document {}: {source}", path.display())]
    Io {
        /// Source path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The input is not well-formed XML.
    #[error("invalid XML in trace document: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The input is not a valid JSON trace document.
    #[error("invalid JSON trace document: {0}")]
    Json(#[from] serde_json::Error),
    /// The input is well-formed but does not follow the trace schema.
    #[error("malformed trace document: {0}")]
    Malformed(String),
}

impl From<quick_xml::events::attributes::AttrError> for DocumentError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        DocumentError::Xml(err.into())
    }
}
