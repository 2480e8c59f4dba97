use std::{io, path::Path};

use anyhow::{Context, Result};

use crate::{commands::load_document, output};

pub fn execute(path: &Path) -> Result<()> {
    let document = load_document(path)?;
    if document.threads.is_empty() {
        output::warn(format!("{} contains no threads", path.display()));
    }
    let stdout = io::stdout();
    document
        .render_console(&mut stdout.lock())
        .context("failed to write trace to stdout")
}
