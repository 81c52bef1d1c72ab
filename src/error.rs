//! Error types for the md2docx library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Md2DocxError`] — **Fatal**: the conversion cannot proceed at all
//!   (missing input file, invalid configuration, DOCX packing failure, or a
//!   safe-mode retry that also failed). Returned as `Err(Md2DocxError)` from
//!   the top-level `convert*` functions.
//!
//! * [`RenderError`] — **Non-fatal**: a single formula or graphic fragment
//!   failed to render (sandbox launch failure, timeout, bad SVG). These are
//!   absorbed by the resilience controller, which degrades the fragment to
//!   its literal source text and keeps the conversion going.
//!
//! The separation lets callers decide their own tolerance: a render failure
//! shows up as a warning string and a literal fragment in the output
//! document, never as an `Err` from `convert`.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the md2docx library.
///
/// Per-fragment render failures use [`RenderError`] and surface as warnings
/// in [`crate::output::ConversionOutput`] rather than propagating here.
#[derive(Debug, Error)]
pub enum Md2DocxError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input markdown file was not found at the given path.
    #[error("markdown file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The input file exists but could not be read.
    #[error("failed to read input file '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output DOCX file.
    #[error("failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document tree could not be packed into a DOCX archive.
    #[error("failed to pack DOCX archive: {detail}")]
    Pack { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The whole conversion failed, was retried once in safe mode with
    /// rendering disabled, and the safe-mode pass failed too. Terminal.
    #[error("conversion failed even in safe mode: {detail} (first attempt: {first})")]
    SafeModeFailed { first: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure for a single formula or graphic fragment.
///
/// Matches the rendering sandbox contract: every failure mode is normalised
/// to a typed cause here and logged. Nothing of this type escapes the
/// resilience controller — exhausted retries become an absent
/// [`crate::pipeline::render::RenderedImage`], not an error.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The sandbox process could not be spawned (missing browser binary,
    /// exec failure, non-zero exit).
    #[error("failed to launch rendering sandbox: {detail}")]
    LaunchFailed { detail: String },

    /// The sandbox did not produce a screenshot within the launch ceiling.
    #[error("sandbox render timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The rendered page contained no visible content to capture.
    #[error("target element not found in rendered page")]
    MissingTarget,

    /// Formula source could not be typeset to markup.
    #[error("formula typesetting failed: {detail}")]
    Typeset { detail: String },

    /// Direct vector rasterisation failed (malformed SVG, zero-sized canvas).
    #[error("vector rasterisation failed: {detail}")]
    Raster { detail: String },

    /// Scratch-file or asset I/O failed.
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}
