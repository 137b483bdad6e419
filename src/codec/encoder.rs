//! Snapshot encoding

use chrono::Local;
use std::path::{Path, PathBuf};

use crate::error::CodecError;
use crate::frame::Frame;

/// Write `frame` as `IMG_<timestamp>.jpg` into `dir` and return the path.
pub fn save_snapshot(frame: &Frame, dir: &Path) -> Result<PathBuf, CodecError> {
    let name = format!("IMG_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(name);
    frame
        .image()
        .save(&path)
        .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
    tracing::info!("Saved snapshot {}", path.display());
    Ok(path)
}
