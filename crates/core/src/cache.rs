use crate::error::IngestError;
use crate::models::PageRecord;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Writes `records` as pretty-printed JSON, replacing any existing file.
pub fn save_pages(records: &[PageRecord], path: &Path) -> Result<(), IngestError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json)?;
    info!(path = %path.display(), pages = records.len(), "saved pages data");
    Ok(())
}

/// Reads records written by [`save_pages`].
///
/// A missing or unreadable file yields `None` so the caller re-extracts.
pub fn load_pages(path: &Path) -> Option<Vec<PageRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "pages data not found, will parse the pdf");
            return None;
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "could not read pages data");
            return None;
        }
    };

    match serde_json::from_str::<Vec<PageRecord>>(&raw) {
        Ok(records) => {
            info!(path = %path.display(), pages = records.len(), "loaded pages data");
            Some(records)
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "pages data is corrupted, will parse the pdf");
            None
        }
    }
}
