//! # md2docx
//!
//! Resilient Markdown → Word (DOCX) conversion with rendered math and
//! diagrams.
//!
//! ## Why this crate?
//!
//! Word cannot display LaTeX math or SVG, so a naive converter either drops
//! those fragments or emits their source as noise. Instead this crate
//! typesets each formula with KaTeX, rasterises each diagram, and embeds the
//! results as images — and when rendering is unavailable or keeps failing,
//! it degrades per fragment rather than failing the document: the original
//! markup text stays in place, byte for byte.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Preprocess  regex substitution of $$…$$, ```svg, <rect…> debris, $…$
//!  │                 (concurrent renders, order-preserving splice)
//!  ├─ 2. Render      KaTeX → headless-browser screenshot / resvg raster
//!  │                 (per-fragment retries, safe-mode latch after 5 failures)
//!  ├─ 3. Assemble    markdown tokens → document elements (+ title/TOC)
//!  └─ 4. Serialize   elements → styled DOCX archive
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md2docx::{convert_to_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let markdown = "# Report\n\nEnergy: $E = mc^2$\n";
//!     let output = convert_to_file(markdown, "report.docx", &config).await?;
//!     eprintln!(
//!         "{} formulas rendered, {} warnings",
//!         output.stats.formulas_rendered,
//!         output.warnings.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Degradation ladder
//!
//! | Condition | Behaviour |
//! |-----------|-----------|
//! | one render fails | retried (`max_retries`, default 3) with a fixed delay |
//! | retries exhausted | fragment stays literal text, warning recorded |
//! | 5 cumulative failures | safe mode: remaining renders skipped outright |
//! | whole pipeline fails | one retry with all rendering off |
//! | safe-mode retry fails | [`Md2DocxError::SafeModeFailed`] — the only terminal case |
//!
//! Formula rendering needs a chromium-family browser on the host; without
//! one, every formula degrades to literal text and the conversion still
//! succeeds. SVG rasterisation is in-process and has no such requirement.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod convert;
pub mod docx;
pub mod element;
pub mod error;
pub mod output;
pub mod pipeline;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, Margins, PageSize};
pub use convert::{convert, convert_file, convert_sync, convert_to_file, convert_with_base};
pub use element::{DocumentElement, InlineSpan, ListItem, ListMarker};
pub use error::{Md2DocxError, RenderError};
pub use output::{ConversionOutput, ConversionStats, ExtractedDocument, ImageAsset};
pub use pipeline::render::{RenderAdapter, RenderRequest, RenderedImage, Renderer, RequestKind};
pub use pipeline::sandbox::{Capture, HeadlessChromium, SandboxBackend};
