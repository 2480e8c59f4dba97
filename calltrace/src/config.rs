//! Tracer configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{
    call_tree::LocatorStrategy,
    document::{DEFAULT_EXPORT_FILE, ExportFormat},
    frame::FrameResolver,
};

/// Configuration for a [`Tracer`](crate::Tracer).
///
/// Every field has a default, so a configuration file only needs the keys it
/// changes.
///
/// # Examples
///
/// ```
/// use calltrace::{ExportFormat, TracerConfig};
///
/// let config = TracerConfig {
///     export_format: ExportFormat::Json,
///     output_path: "trace.json".into(),
///     ..Default::default()
/// };
/// assert!(config.excluded_crates.iter().any(|c| c == "calltrace"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Where [`Tracer::export_document`](crate::Tracer::export_document)
    /// writes when no path is given. Defaults to `ResultXML.xml`.
    pub output_path: PathBuf,
    /// Format used by `export_document`.
    pub export_format: ExportFormat,
    /// How the open call of a thread is located.
    pub locator: LocatorStrategy,
    /// Crates whose frames are never reported as the caller. Always includes
    /// the tracer itself and the stack walker unless overridden.
    pub excluded_crates: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_EXPORT_FILE),
            export_format: ExportFormat::default(),
            locator: LocatorStrategy::default(),
            excluded_crates: FrameResolver::DEFAULT_EXCLUDED
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl TracerConfig {
    /// The frame resolver described by this configuration.
    pub fn resolver(&self) -> FrameResolver {
        FrameResolver::new(self.excluded_crates.iter().cloned())
    }
}
