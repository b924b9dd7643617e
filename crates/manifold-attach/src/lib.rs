// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Attachment normalizer: turns raw bytes (from disk, an upload, or a data
//! URL) into a canonical [`Attachment`] with a detected MIME type.
//!
//! Detection order:
//! 1. content sniffing on the leading bytes (magic numbers),
//! 2. extension of the supplied filename,
//! 3. `application/octet-stream`.
//!
//! Whether a model actually accepts the detected type is the owning
//! provider's decision at translation time; the normalizer only names what
//! the bytes are.

use std::path::Path;

use manifold_model::{parse_data_url, Attachment};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("could not read attachment '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("invalid data URL: {0}")]
    InvalidDataUrl(&'static str),

    #[error("attachment is empty")]
    Empty,
}

/// Fallback when neither sniffing nor the extension identifies the bytes.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Detect the MIME type of `data`, preferring content over the filename.
pub fn detect_mime(data: &[u8], filename: Option<&str>) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    if let Some(name) = filename {
        if let Some(mime) = mime_guess::from_path(Path::new(name)).first_raw() {
            return mime.to_string();
        }
    }
    // Text content has no magic number and may arrive without a filename;
    // valid UTF-8 with no NUL bytes is worth more than octet-stream.
    if !data.is_empty() && !data.contains(&0) && std::str::from_utf8(data).is_ok() {
        return "text/plain".to_string();
    }
    OCTET_STREAM.to_string()
}

/// Normalize raw bytes into a canonical [`Attachment`].
pub fn normalize(data: Vec<u8>, filename: Option<String>) -> Result<Attachment, AttachError> {
    if data.is_empty() {
        return Err(AttachError::Empty);
    }
    let mime = detect_mime(&data, filename.as_deref());
    debug!(mime = %mime, size = data.len(), "normalized attachment");
    Ok(Attachment::new(filename, mime, data))
}

/// Read and normalize a file from disk.
pub fn from_path(path: &Path) -> Result<Attachment, AttachError> {
    let data =
        std::fs::read(path).map_err(|e| AttachError::Io(path.display().to_string(), e))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    normalize(data, filename)
}

/// Parse a `data:<mime>;base64,<b64>` URL into an [`Attachment`].
///
/// The embedded MIME type is kept when present; an empty one falls back to
/// detection on the decoded bytes.
pub fn from_data_url(url: &str) -> Result<Attachment, AttachError> {
    let mut att = parse_data_url(url).map_err(AttachError::InvalidDataUrl)?;
    if att.data.is_empty() {
        return Err(AttachError::Empty);
    }
    if att.mime_type.is_empty() {
        att.mime_type = detect_mime(&att.data, None);
    }
    Ok(att)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
