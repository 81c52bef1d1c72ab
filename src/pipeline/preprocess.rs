//! Markup preprocessing: find renderable fragments in the source text and
//! substitute image references for them before Markdown parsing.
//!
//! Four passes run in a fixed order, each one concurrent across its own
//! matches via [`replace_all_async`]:
//!
//! 1. display math (`$$ ... $$`)
//! 2. fenced SVG code blocks
//! 3. malformed embedded SVG (comment header + orphaned shape elements)
//! 4. inline math (`$ ... $`)
//!
//! Display math runs before inline math so a `$$` block is never chewed up
//! as two inline delimiters. Every pass degrades to the original matched
//! text (or a labelled placeholder for unparseable SVG debris), so a
//! conversion with rendering unavailable still yields the source verbatim.

use crate::context::ConversionContext;
use crate::pipeline::render::{RenderRequest, RenderedImage, Renderer};
use crate::pipeline::resilience::render_with_retry;
use crate::pipeline::substitute::replace_all_async;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::convert::Infallible;
use std::future::Future;
use tracing::debug;

static DISPLAY_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$\s*\n?(.*?)\n?\s*\$\$").unwrap());

static SVG_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```svg\s*\n(.*?)\n```").unwrap());

/// Broken SVG debris as it survives copy-paste: an XML comment header
/// followed by shape elements with no enclosing `<svg>` tag, up to the next
/// closed text element.
static EMBEDDED_SVG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--\s*.*?-->\s*<rect.*?/text>").unwrap());

static INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([^$\n]+)\$").unwrap());

static RECT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<rect\b[^>]*/?>").unwrap());
static TEXT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<text\b[^>]*>.*?</text>").unwrap());

/// Run the substitution passes enabled by the context's configuration.
pub async fn preprocess(markup: &str, renderer: &dyn Renderer, ctx: &ConversionContext) -> String {
    let math = ctx.config.render_math && ctx.config.math_to_image;
    let svg = ctx.config.render_svg;

    let mut text = markup.to_string();

    if math {
        text = run_pass(&text, &DISPLAY_MATH, |caps| {
            let latex = caps[1].trim().to_string();
            let original = caps[0].to_string();
            async move {
                let request = RenderRequest::formula(latex, true);
                match render_with_retry(renderer, &request, ctx).await {
                    Some(image) => block_image("formula", &image),
                    None => original,
                }
            }
        })
        .await;
    }

    if svg {
        text = run_pass(&text, &SVG_FENCE, |caps| {
            let source = caps[1].to_string();
            let original = caps[0].to_string();
            async move {
                let request = RenderRequest::graphic(source);
                match render_with_retry(renderer, &request, ctx).await {
                    Some(image) => block_image("diagram", &image),
                    None => original,
                }
            }
        })
        .await;

        text = run_pass(&text, &EMBEDDED_SVG, |caps| {
            let debris = caps[0].to_string();
            async move {
                match reconstruct_svg(&debris) {
                    Some(source) => {
                        let request = RenderRequest::graphic(source);
                        match render_with_retry(renderer, &request, ctx).await {
                            Some(image) => block_image("diagram", &image),
                            None => "\n**[SVG diagram]**\n".to_string(),
                        }
                    }
                    // Nothing salvageable; the raw debris would corrupt the
                    // document, so replace it with a labelled placeholder.
                    None => "\n**[SVG diagram]**\n".to_string(),
                }
            }
        })
        .await;
    }

    if math {
        text = run_pass(&text, &INLINE_MATH, |caps| {
            let latex = caps[1].trim().to_string();
            let original = caps[0].to_string();
            async move {
                let request = RenderRequest::formula(latex, false);
                match render_with_retry(renderer, &request, ctx).await {
                    Some(image) => inline_image("formula", &image),
                    None => original,
                }
            }
        })
        .await;
    }

    text
}

/// One concurrent substitution pass whose transform cannot fail.
async fn run_pass<'t, F, Fut>(text: &'t str, pattern: &Regex, transform: F) -> String
where
    F: Fn(&Captures<'t>) -> Fut,
    Fut: Future<Output = String>,
{
    let result = replace_all_async(text, pattern, |caps| {
        let fut = transform(caps);
        async move { Ok::<String, Infallible>(fut.await) }
    })
    .await;
    match result {
        Ok(out) => out,
        Err(never) => match never {},
    }
}

// Destinations are wrapped in angle brackets so asset paths containing
// spaces still parse as a single link target.
fn block_image(alt: &str, image: &RenderedImage) -> String {
    format!("\n\n![{alt}](<{}>)\n\n", image.path.display())
}

fn inline_image(alt: &str, image: &RenderedImage) -> String {
    format!("![{alt}](<{}>)", image.path.display())
}

/// Rebuild a renderable SVG from orphaned `<rect>` and `<text>` elements.
///
/// The debris this targets is bar-chart shaped: rectangles plus labels.
/// Anything without at least one shape is declared unsalvageable.
fn reconstruct_svg(debris: &str) -> Option<String> {
    let rects: Vec<&str> = RECT_TAG.find_iter(debris).map(|m| m.as_str()).collect();
    if rects.is_empty() {
        return None;
    }
    let texts: Vec<&str> = TEXT_TAG.find_iter(debris).map(|m| m.as_str()).collect();

    let mut body = String::new();
    for rect in &rects {
        body.push_str("  ");
        body.push_str(&with_class(rect, "<rect ", "<rect class=\"bar\" "));
        body.push('\n');
    }
    for text in &texts {
        body.push_str("  ");
        body.push_str(&with_class(text, "<text ", "<text class=\"label\" "));
        body.push('\n');
    }

    debug!(
        "reconstructed SVG from {} rect(s) and {} text label(s)",
        rects.len(),
        texts.len()
    );
    Some(format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"300\" height=\"200\" viewBox=\"0 0 300 200\">\n\
         <style>\n\
         .bar {{ fill: #4CAF50; }}\n\
         .label {{ font-family: Arial, sans-serif; font-size: 12px; fill: #333; }}\n\
         </style>\n{body}</svg>"
    ))
}

fn with_class(element: &str, open: &str, open_with_class: &str) -> String {
    if element.contains("class=") {
        element.to_string()
    } else {
        element.replacen(open, open_with_class, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::error::RenderError;
    use crate::pipeline::render::{RenderRequest, RenderedImage, Renderer};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRenderer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRenderer {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render(
            &self,
            _request: &RenderRequest,
            _asset_dir: &Path,
        ) -> Result<RenderedImage, RenderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RenderError::MissingTarget);
            }
            let filename = format!("img_{n}.png");
            Ok(RenderedImage {
                path: filename.clone().into(),
                filename,
                bytes: vec![0],
                width: 10,
                height: 10,
            })
        }
    }

    fn ctx(config: ConversionConfig) -> ConversionContext {
        ConversionContext::new(std::env::temp_dir(), config)
    }

    fn default_ctx() -> ConversionContext {
        ctx(ConversionConfig::builder()
            .retry_delay_ms(1)
            .build()
            .unwrap())
    }

    #[tokio::test]
    async fn inline_math_becomes_image_reference() {
        let renderer = CountingRenderer::ok();
        let out = preprocess("before $x^2$ after", &renderer, &default_ctx()).await;
        assert_eq!(out, "before ![formula](<img_0.png>) after");
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn display_math_is_not_consumed_as_inline() {
        let renderer = CountingRenderer::ok();
        let out = preprocess("$$\nE = mc^2\n$$", &renderer, &default_ctx()).await;
        assert_eq!(renderer.calls(), 1);
        assert!(out.contains("![formula]"));
        assert!(!out.contains('$'));
    }

    #[tokio::test]
    async fn svg_fence_is_replaced() {
        let renderer = CountingRenderer::ok();
        let markup = "intro\n\n```svg\n<svg xmlns=\"x\"><rect/></svg>\n```\n\noutro";
        let out = preprocess(markup, &renderer, &default_ctx()).await;
        assert!(out.contains("![diagram]"));
        assert!(!out.contains("```svg"));
    }

    #[tokio::test]
    async fn failed_renders_leave_math_untouched() {
        let renderer = CountingRenderer::failing();
        let markup = "a $x$ b\n\n$$y$$\n";
        let out = preprocess(markup, &renderer, &default_ctx()).await;
        assert_eq!(out, markup);
    }

    #[tokio::test]
    async fn embedded_debris_becomes_placeholder_when_render_fails() {
        let renderer = CountingRenderer::failing();
        let markup = "text\n<!-- chart -->\n<rect x=\"0\" y=\"0\" width=\"10\" height=\"10\"/>\n<text x=\"1\" y=\"1\">A</text>\nmore";
        let out = preprocess(markup, &renderer, &default_ctx()).await;
        assert!(out.contains("**[SVG diagram]**"));
        assert!(!out.contains("<rect"));
    }

    #[tokio::test]
    async fn flags_gate_each_pass() {
        let renderer = CountingRenderer::ok();
        let config = ConversionConfig::builder()
            .math_to_image(false)
            .render_svg(false)
            .build()
            .unwrap();
        let markup = "$x$ and\n```svg\n<svg/>\n```";
        let out = preprocess(markup, &renderer, &ctx(config)).await;
        assert_eq!(out, markup);
        assert_eq!(renderer.calls(), 0);
    }

    #[test]
    fn reconstruct_requires_a_shape() {
        assert!(reconstruct_svg("<!-- x --> <text x=\"0\" y=\"0\">hi</text>").is_none());
        let svg = reconstruct_svg("<rect x=\"0\" y=\"0\" width=\"5\" height=\"5\"/>").unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("viewBox=\"0 0 300 200\""));
    }

    #[test]
    fn embedded_pattern_matches_commented_debris() {
        let debris = "<!-- bar chart -->\n<rect x=\"0\"/>\n<text x=\"1\">Q1</text>";
        assert!(EMBEDDED_SVG.is_match(debris));
        assert!(!EMBEDDED_SVG.is_match("<rect x=\"0\"/>"));
    }
}
