//! Output types: the converted document plus its by-products.
//!
//! `convert` succeeds with a best-effort document even when individual
//! fragments failed to render — those show up in `warnings` and in the
//! stats counters, never as an `Err`.

use crate::element::DocumentElement;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of a Markdown-to-DOCX conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The packed DOCX archive.
    pub docx: Vec<u8>,
    /// The element sequence the document was serialized from, front matter
    /// included. Useful for callers that post-inspect structure and for
    /// tests that assert on it.
    pub elements: Vec<DocumentElement>,
    /// Render assets generated during preprocessing, for callers that need
    /// to persist them separately from the document.
    pub images: Vec<ImageAsset>,
    /// Human-readable notes about degraded fragments (failed renders,
    /// unreadable referenced images, safe-mode activation).
    pub warnings: Vec<String>,
    pub stats: ConversionStats,
}

/// Aggregate statistics for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Formulas successfully rendered to images.
    pub formulas_rendered: usize,
    /// Graphic blocks successfully rendered to images.
    pub graphics_rendered: usize,
    /// Failed render attempts (retries included).
    pub render_failures: usize,
    /// Whether the conversion finished in safe mode — either tripped by the
    /// failure threshold or forced by the document-level fallback.
    pub safe_mode: bool,
    pub preprocess_duration_ms: u64,
    pub assemble_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// A generated or extracted image: payload plus where it lives on disk.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `image/png`.
    pub content_type: String,
    /// Natural pixel dimensions.
    pub width: u32,
    pub height: u32,
}

/// Output contract of the reverse direction (DOCX → markdown).
///
/// The extraction itself is implemented by a separate component; this crate
/// only defines the shape consumed by callers that round-trip documents.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub markup: String,
    pub images: Vec<ImageAsset>,
    pub warnings: Vec<String>,
}
