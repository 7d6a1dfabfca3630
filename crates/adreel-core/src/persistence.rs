use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::model::{Page, PageDocument};

/// Writes the page as a `PageDocument` through a temp file in the same
/// directory so a crash never leaves a truncated document behind.
#[instrument(skip(page), fields(objects = page.objects.len(), path = %path.display()))]
pub fn save_page(path: &Path, page: &Page) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let document = page.to_document().context("failed to serialize scene graph")?;
    let json = serde_json::to_vec_pretty(&document).context("failed to serialize page")?;
    let mut temp_file = tempfile::NamedTempFile::new_in(
        path.parent()
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf),
    )
    .context("failed to create temp page file")?;

    temp_file
        .write_all(&json)
        .context("failed to write temp page file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist page: {}", path.display()))?;

    info!(bytes = json.len(), "page saved");
    Ok(())
}

#[instrument(fields(path = %path.display()))]
pub fn load_page(path: &Path) -> Result<Page> {
    let content =
        fs::read(path).with_context(|| format!("failed to read page: {}", path.display()))?;
    let document: PageDocument =
        serde_json::from_slice(&content).context("invalid page document json")?;
    let page = Page::from_document(&document).context("invalid page document")?;
    info!(
        objects = page.objects.len(),
        audios = page.audios.len(),
        "page loaded"
    );
    Ok(page)
}

#[instrument(skip(page), fields(autosave_dir = %autosave_dir.display()))]
pub fn autosave_page(page: &Page, autosave_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(autosave_dir).with_context(|| {
        format!(
            "failed to create autosave directory: {}",
            autosave_dir.display()
        )
    })?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S%3f");
    let autosave_path = autosave_dir.join(format!("page-{timestamp}.autosave.adreel.json"));
    save_page(&autosave_path, page)?;

    debug!(path = %autosave_path.display(), "autosave complete");
    Ok(autosave_path)
}
