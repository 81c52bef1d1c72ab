//! The rendering adapter: formula/graphic source text → raster image file.
//!
//! Two request kinds share one [`Renderer`] trait so the resilience
//! controller (and the test stubs) treat them uniformly:
//!
//! * **Formula** — typeset LaTeX to HTML with KaTeX, wrap it in a minimal
//!   styled page, and screenshot the element through the sandbox.
//! * **Graphic** — rasterise the SVG directly with resvg; when that fails
//!   (unsupported features, broken markup that a browser still tolerates),
//!   fall back to a full-page sandbox screenshot.
//!
//! Output filenames are time-stamped so concurrent renders within one
//! conversion never collide.

use crate::config::ConversionConfig;
use crate::error::RenderError;
use crate::pipeline::sandbox::{Capture, HeadlessChromium, SandboxBackend};
use async_trait::async_trait;
use resvg::{tiny_skia, usvg};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// An immutable render request, created by the markup preprocessor and
/// consumed through the resilience controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Raw formula or graphic source text.
    pub source: String,
    pub kind: RequestKind,
}

/// What the source text is and how to render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// LaTeX-like math notation; `display` selects block vs. inline layout.
    Formula { display: bool },
    /// SVG source.
    Graphic,
}

impl RenderRequest {
    pub fn formula(source: impl Into<String>, display: bool) -> Self {
        Self {
            source: source.into(),
            kind: RequestKind::Formula { display },
        }
    }

    pub fn graphic(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: RequestKind::Graphic,
        }
    }

    /// Whether this request renders a formula (used for stats bucketing).
    pub fn is_formula(&self) -> bool {
        matches!(self.kind, RequestKind::Formula { .. })
    }
}

/// A successfully rendered fragment: the asset on disk plus its payload.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub path: PathBuf,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The adapter seam: one async call per fragment, every failure typed.
///
/// Injected as `Arc<dyn Renderer>` through
/// [`crate::config::ConversionConfig::renderer`] so tests can stub it.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        request: &RenderRequest,
        asset_dir: &Path,
    ) -> Result<RenderedImage, RenderError>;
}

/// Production renderer backed by KaTeX, resvg, and a sandbox.
pub struct RenderAdapter {
    sandbox: Arc<dyn SandboxBackend>,
    font: String,
    svg_bounds: (u32, u32),
}

impl RenderAdapter {
    pub fn new(sandbox: Arc<dyn SandboxBackend>, font: impl Into<String>, svg_bounds: (u32, u32)) -> Self {
        Self {
            sandbox,
            font: font.into(),
            svg_bounds,
        }
    }

    /// Build the default adapter for a conversion: discover a system
    /// browser and wire the config's font and bounds through.
    pub fn from_config(config: &ConversionConfig) -> Self {
        let sandbox = Arc::new(HeadlessChromium::discover(Duration::from_secs(
            config.sandbox_timeout_secs,
        )));
        Self::new(sandbox, config.font.clone(), config.svg_bounds)
    }

    async fn render_formula(
        &self,
        latex: &str,
        display: bool,
        asset_dir: &Path,
    ) -> Result<RenderedImage, RenderError> {
        let opts = katex::Opts::builder()
            .display_mode(display)
            .output_type(katex::OutputType::Html)
            .throw_on_error(false)
            .error_color("#cc0000".to_string())
            .build()
            .map_err(|e| RenderError::Typeset {
                detail: e.to_string(),
            })?;
        let html = katex::render_with_opts(latex, &opts).map_err(|e| RenderError::Typeset {
            detail: e.to_string(),
        })?;

        let page = formula_page(&html, display, &self.font);
        let png = self.sandbox.render_page(&page, Capture::Element).await?;
        write_asset(asset_dir, "math", png).await
    }

    async fn render_graphic(&self, svg: &str, asset_dir: &Path) -> Result<RenderedImage, RenderError> {
        let svg = ensure_xml_decl(svg);
        let png = match rasterise_svg(&svg, self.svg_bounds) {
            Ok(png) => png,
            Err(e) => {
                warn!("direct SVG rasterisation failed, falling back to sandbox: {e}");
                self.sandbox
                    .render_page(&graphic_page(&svg), Capture::FullPage)
                    .await?
            }
        };
        write_asset(asset_dir, "svg", png).await
    }
}

#[async_trait]
impl Renderer for RenderAdapter {
    async fn render(
        &self,
        request: &RenderRequest,
        asset_dir: &Path,
    ) -> Result<RenderedImage, RenderError> {
        match request.kind {
            RequestKind::Formula { display } => {
                self.render_formula(&request.source, display, asset_dir).await
            }
            RequestKind::Graphic => self.render_graphic(&request.source, asset_dir).await,
        }
    }
}

/// Write the raster bytes to a time-stamped file in the asset directory.
///
/// Nanosecond stamps: concurrent renders within one conversion routinely
/// resolve inside the same millisecond.
async fn write_asset(dir: &Path, prefix: &str, png: Vec<u8>) -> Result<RenderedImage, RenderError> {
    tokio::fs::create_dir_all(dir).await?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let filename = format!("{prefix}_{stamp}.png");
    let path = dir.join(&filename);
    tokio::fs::write(&path, &png).await?;

    let (width, height) = image::load_from_memory(&png)
        .map(|img| (img.width(), img.height()))
        .map_err(|e| RenderError::Raster {
            detail: format!("rendered image is not decodable: {e}"),
        })?;
    debug!("wrote render asset {} ({width}x{height})", path.display());

    Ok(RenderedImage {
        path,
        filename,
        bytes: png,
        width,
        height,
    })
}

/// Minimal self-contained page wrapping a typeset formula.
///
/// Inline CSS only — the sandbox must never reach for a network. The subset
/// of KaTeX layout rules below is enough for fractions, roots, and operator
/// spacing to survive without the full stylesheet.
fn formula_page(katex_html: &str, display: bool, font: &str) -> String {
    let size = if display { "20px" } else { "16px" };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  body {{ margin: 20px; background: white; font-family: {font}; }}
  .katex {{ font-size: {size}; font-family: KaTeX_Main, "Times New Roman", serif; }}
  .katex-display {{ display: block; margin: 1em 0; text-align: center; }}
  .katex .base {{ position: relative; display: inline-block; }}
  .katex .strut {{ display: inline-block; }}
  .katex .frac-line {{ border-bottom: 1px solid; margin: 0 0.04em; }}
  .katex .sqrt > .root {{ margin-left: 0.278em; margin-right: -0.556em; }}
</style>
</head>
<body>{katex_html}</body>
</html>
"#
    )
}

/// Minimal page embedding an SVG for the sandbox fallback path.
fn graphic_page(svg: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  body {{ margin: 0; padding: 20px; background: white; }}
  svg {{ max-width: 100%; height: auto; }}
</style>
</head>
<body>{svg}</body>
</html>
"#
    )
}

fn ensure_xml_decl(svg: &str) -> String {
    if svg.contains("<?xml") {
        svg.to_string()
    } else {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{svg}")
    }
}

/// Rasterise well-formed SVG source, fitted inside `bounds` without
/// enlargement, onto a white background.
fn rasterise_svg(svg: &str, bounds: (u32, u32)) -> Result<Vec<u8>, RenderError> {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_str(svg, &options).map_err(|e| RenderError::Raster {
        detail: e.to_string(),
    })?;

    let size = tree.size();
    if size.width() <= 0.0 || size.height() <= 0.0 {
        return Err(RenderError::Raster {
            detail: "SVG has a zero-sized viewport".to_string(),
        });
    }

    let (max_w, max_h) = (bounds.0 as f32, bounds.1 as f32);
    let scale = (max_w / size.width()).min(max_h / size.height()).min(1.0);
    let width = (size.width() * scale).ceil().max(1.0) as u32;
    let height = (size.height() * scale).ceil().max(1.0) as u32;

    let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| RenderError::Raster {
        detail: format!("cannot allocate {width}x{height} pixmap"),
    })?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    pixmap.encode_png().map_err(|e| RenderError::Raster {
        detail: e.to_string(),
    })
}
