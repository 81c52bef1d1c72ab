//! Configuration types for Markdown-to-DOCX conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to clone a modified copy for the safe-mode retry and to diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::Md2DocxError;
use crate::pipeline::render::Renderer;
use std::fmt;
use std::sync::Arc;

/// Configuration for a Markdown-to-DOCX conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use md2docx::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .max_retries(5)
///     .retry_delay_ms(250)
///     .font("Georgia")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Master switch for formula handling. Default: true.
    ///
    /// When off, both formula passes are skipped regardless of
    /// `math_to_image` and `$…$` / `$$…$$` fragments flow through to the
    /// document as literal text.
    pub render_math: bool,

    /// Convert formulas to raster images via the sandbox. Default: true.
    ///
    /// When off, formulas stay literal text even with `render_math` on. The
    /// safe-mode document retry forces this off to guarantee completion.
    pub math_to_image: bool,

    /// Convert SVG blocks (fenced and embedded) to raster images. Default: true.
    pub render_svg: bool,

    /// Degraded operating mode: all rendering-dependent substitutions are
    /// short-circuited. Default: false.
    ///
    /// Internal — set by the document-level fallback, or flipped at runtime
    /// once cumulative render failures cross the threshold. Not normally set
    /// by callers.
    pub safe_mode: bool,

    /// Maximum retry attempts per render request. Default: 3.
    ///
    /// A deterministic failure therefore costs `max_retries + 1` sandbox
    /// invocations before the fragment degrades to literal text. Transient
    /// sandbox failures (slow machine, cold browser start) usually succeed
    /// on the first or second retry.
    pub max_retries: u32,

    /// Delay between retry attempts in milliseconds. Default: 1000.
    ///
    /// Fixed, not exponential: sandbox failures are dominated by local
    /// resource pressure, which a constant breather handles as well as a
    /// growing one — and a fixed delay keeps worst-case latency predictable
    /// (`max_retries * retry_delay_ms` per fragment).
    pub retry_delay_ms: u64,

    /// Page size of the output document. Default: A4.
    pub page_size: PageSize,

    /// Page margins in twips (1/20 pt). Default: 720 (0.5 inch) all round.
    pub margins: Margins,

    /// Base font family for body text. Default: "Times New Roman".
    pub font: String,

    /// Base font size in half-points. Default: 24 (12 pt).
    pub font_size: usize,

    /// Ceiling for one sandbox launch-and-screenshot cycle in seconds.
    /// Default: 30.
    ///
    /// A hung browser process blocks only its own fragment; other
    /// concurrently-issued renders keep going. On expiry the process is
    /// killed and the attempt counts as a failure.
    pub sandbox_timeout_secs: u64,

    /// Maximum embedded image width in pixels. Default: 500.
    ///
    /// Larger images are scaled down preserving aspect ratio so they fit the
    /// printable page width.
    pub max_image_width: u32,

    /// Maximum embedded image height in pixels. Default: 350.
    pub max_image_height: u32,

    /// Pixel bounds for direct SVG rasterisation (width, height).
    /// Default: (800, 600). SVGs are fitted inside without enlargement.
    pub svg_bounds: (u32, u32),

    /// Pre-constructed renderer. Takes precedence over the default
    /// chromium-backed adapter. Used by tests to inject stubs and by callers
    /// that need custom middleware (caching, shared browser pools).
    pub renderer: Option<Arc<dyn Renderer>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            render_math: true,
            math_to_image: true,
            render_svg: true,
            safe_mode: false,
            max_retries: 3,
            retry_delay_ms: 1000,
            page_size: PageSize::A4,
            margins: Margins::default(),
            font: "Times New Roman".to_string(),
            font_size: 24,
            sandbox_timeout_secs: 30,
            max_image_width: 500,
            max_image_height: 350,
            svg_bounds: (800, 600),
            renderer: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("render_math", &self.render_math)
            .field("math_to_image", &self.math_to_image)
            .field("render_svg", &self.render_svg)
            .field("safe_mode", &self.safe_mode)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("page_size", &self.page_size)
            .field("margins", &self.margins)
            .field("font", &self.font)
            .field("font_size", &self.font_size)
            .field("sandbox_timeout_secs", &self.sandbox_timeout_secs)
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn Renderer>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether any preprocessing pass would invoke the renderer.
    pub(crate) fn wants_rendering(&self) -> bool {
        (self.render_math && self.math_to_image) || self.render_svg
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn render_math(mut self, v: bool) -> Self {
        self.config.render_math = v;
        self
    }

    pub fn math_to_image(mut self, v: bool) -> Self {
        self.config.math_to_image = v;
        self
    }

    pub fn render_svg(mut self, v: bool) -> Self {
        self.config.render_svg = v;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn page_size(mut self, size: PageSize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.config.margins = margins;
        self
    }

    pub fn font(mut self, font: impl Into<String>) -> Self {
        self.config.font = font.into();
        self
    }

    pub fn font_size(mut self, half_points: usize) -> Self {
        self.config.font_size = half_points.max(2);
        self
    }

    pub fn sandbox_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sandbox_timeout_secs = secs.max(1);
        self
    }

    pub fn max_image_width(mut self, px: u32) -> Self {
        self.config.max_image_width = px.max(10);
        self
    }

    pub fn max_image_height(mut self, px: u32) -> Self {
        self.config.max_image_height = px.max(10);
        self
    }

    pub fn svg_bounds(mut self, width: u32, height: u32) -> Self {
        self.config.svg_bounds = (width.max(10), height.max(10));
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Md2DocxError> {
        let c = &self.config;
        if c.font.trim().is_empty() {
            return Err(Md2DocxError::InvalidConfig("font must not be empty".into()));
        }
        if c.max_retries > 20 {
            return Err(Md2DocxError::InvalidConfig(format!(
                "max_retries must be ≤ 20, got {}",
                c.max_retries
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSize {
    /// 210 × 297 mm (default).
    #[default]
    A4,
    /// 8.5 × 11 in.
    Letter,
}

impl PageSize {
    /// Page dimensions in twips (1/20 pt), width then height.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            PageSize::A4 => (11906, 16838),
            PageSize::Letter => (12240, 15840),
        }
    }
}

/// Page margins in twips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margins {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 720,
            right: 720,
            bottom: 720,
            left: 720,
        }
    }
}

impl Margins {
    pub fn uniform(twips: i32) -> Self {
        Self {
            top: twips,
            right: twips,
            bottom: twips,
            left: twips,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = ConversionConfig::builder().build().unwrap();
        assert!(config.render_math);
        assert!(config.math_to_image);
        assert!(config.render_svg);
        assert!(!config.safe_mode);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.font, "Times New Roman");
    }

    #[test]
    fn builder_rejects_empty_font() {
        let err = ConversionConfig::builder().font("  ").build();
        assert!(matches!(err, Err(Md2DocxError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_absurd_retries() {
        let err = ConversionConfig::builder().max_retries(100).build();
        assert!(matches!(err, Err(Md2DocxError::InvalidConfig(_))));
    }

    #[test]
    fn wants_rendering_follows_toggles() {
        let mut config = ConversionConfig::default();
        assert!(config.wants_rendering());
        config.math_to_image = false;
        assert!(config.wants_rendering(), "svg still on");
        config.render_svg = false;
        assert!(!config.wants_rendering());
    }

    #[test]
    fn page_size_dimensions() {
        assert_eq!(PageSize::A4.dimensions(), (11906, 16838));
        assert_eq!(PageSize::Letter.dimensions(), (12240, 15840));
    }
}
