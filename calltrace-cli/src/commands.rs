pub mod demo;
pub mod show;
pub mod summary;

use std::path::Path;

use anyhow::{Context, Result};
use calltrace::TraceDocument;

/// Load an exported trace, picking the format from the file extension.
pub fn load_document(path: &Path) -> Result<TraceDocument> {
    TraceDocument::load(path)
        .with_context(|| format!("failed to load trace from {}", path.display()))
}
