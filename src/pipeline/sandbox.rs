//! The rendering sandbox: an isolated headless-browser process per request.
//!
//! ## Why process-per-request?
//!
//! Formula and graphic fragments come from untrusted documents, and browser
//! renderers leak memory and wedge under malformed input. Spawning a fresh
//! headless instance for every screenshot keeps one bad fragment from
//! poisoning the next and makes teardown trivial: the scratch `TempDir` and
//! the child process are both released on every exit path, including
//! timeout and panic. No pooling — the resilience controller absorbs the
//! launch cost through its retry budget instead.
//!
//! ## Element capture
//!
//! The headless screenshot CLI captures the whole viewport; it cannot
//! screenshot a single DOM node. [`Capture::Element`] is approximated by
//! cropping the screenshot to its non-white content bounding box, which for
//! the minimal single-formula pages we generate is the target element. A
//! fully blank page maps to [`RenderError::MissingTarget`].

use crate::error::RenderError;
use async_trait::async_trait;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// What part of the rendered page to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Crop the screenshot to the content bounding box (formulas).
    Element,
    /// Return the full viewport screenshot (graphics).
    FullPage,
}

/// The narrow sandbox contract: a self-contained HTML document in, raster
/// bytes out, every failure a typed [`RenderError`].
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn render_page(&self, html: &str, capture: Capture) -> Result<Vec<u8>, RenderError>;
}

/// Candidate system browser locations, checked before falling back to
/// `$PATH` lookup.
#[cfg(target_os = "macos")]
const BROWSER_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(not(target_os = "macos"))]
const BROWSER_CANDIDATES: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
];

/// Binary names tried via `$PATH` when no candidate path exists.
const BROWSER_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome-stable",
    "google-chrome",
    "chrome",
];

/// Default sandbox backend: spawns a headless chromium per request.
pub struct HeadlessChromium {
    executable: Option<PathBuf>,
    timeout: Duration,
    viewport: (u32, u32),
}

impl HeadlessChromium {
    /// Locate a system browser and configure the launch ceiling.
    ///
    /// Discovery never fails: a missing browser surfaces as
    /// [`RenderError::LaunchFailed`] on first use, so conversions with
    /// rendering disabled never care.
    pub fn discover(launch_timeout: Duration) -> Self {
        let executable = find_browser();
        match &executable {
            Some(path) => debug!("sandbox browser: {}", path.display()),
            None => warn!("no chromium/chrome executable found; renders will fail"),
        }
        Self {
            executable,
            timeout: launch_timeout,
            viewport: (1200, 800),
        }
    }

    /// Override the viewport (width, height) used for screenshots.
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }
}

fn find_browser() -> Option<PathBuf> {
    for candidate in BROWSER_CANDIDATES {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    BROWSER_NAMES.iter().find_map(|name| which::which(name).ok())
}

#[async_trait]
impl SandboxBackend for HeadlessChromium {
    async fn render_page(&self, html: &str, capture: Capture) -> Result<Vec<u8>, RenderError> {
        let exe = self.executable.as_ref().ok_or_else(|| RenderError::LaunchFailed {
            detail: "no chromium/chrome executable found (install chromium or google-chrome)"
                .to_string(),
        })?;

        // Scratch dir owns both the page and the screenshot; dropped on
        // every exit path.
        let scratch = TempDir::new()?;
        let page_path = scratch.path().join("page.html");
        let shot_path = scratch.path().join("shot.png");
        tokio::fs::write(&page_path, html).await?;

        let (width, height) = self.viewport;
        let mut cmd = Command::new(exe);
        cmd.arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--hide-scrollbars")
            .arg("--default-background-color=FFFFFFFF")
            // Let layout and font loading settle before the screenshot.
            .arg("--virtual-time-budget=10000")
            .arg(format!("--window-size={width},{height}"))
            .arg(format!("--screenshot={}", shot_path.display()))
            .arg(format!("file://{}", page_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| RenderError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| RenderError::LaunchFailed {
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RenderError::LaunchFailed {
                detail: format!(
                    "browser exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let bytes = tokio::fs::read(&shot_path)
            .await
            .map_err(|_| RenderError::MissingTarget)?;

        match capture {
            Capture::FullPage => Ok(bytes),
            Capture::Element => crop_to_content(&bytes),
        }
    }
}

/// Crop a PNG screenshot to the bounding box of its non-white content,
/// with a small uniform margin.
fn crop_to_content(png: &[u8]) -> Result<Vec<u8>, RenderError> {
    const MARGIN: u32 = 8;
    // Anti-aliased glyph edges sit just below pure white.
    const THRESHOLD: u8 = 245;

    let img = image::load_from_memory(png).map_err(|e| RenderError::Raster {
        detail: format!("screenshot decode failed: {e}"),
    })?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        if a > 0 && (r < THRESHOLD || g < THRESHOLD || b < THRESHOLD) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x > max_x || min_y > max_y {
        return Err(RenderError::MissingTarget);
    }

    let x0 = min_x.saturating_sub(MARGIN);
    let y0 = min_y.saturating_sub(MARGIN);
    let x1 = (max_x + MARGIN + 1).min(w);
    let y1 = (max_y + MARGIN + 1).min(h);

    let cropped = img.crop_imm(x0, y0, x1 - x0, y1 - y0);
    let mut out = Vec::new();
    cropped
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| RenderError::Raster {
            detail: format!("screenshot re-encode failed: {e}"),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn crop_finds_content_box() {
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        for x in 40..60 {
            for y in 45..55 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let cropped = crop_to_content(&png_bytes(&img)).unwrap();
        let out = image::load_from_memory(&cropped).unwrap();
        // 20x10 content plus up to 8px margin each side.
        assert!(out.width() >= 20 && out.width() <= 36, "w={}", out.width());
        assert!(out.height() >= 10 && out.height() <= 26, "h={}", out.height());
    }

    #[test]
    fn blank_page_is_missing_target() {
        let img = RgbaImage::from_pixel(50, 50, Rgba([255, 255, 255, 255]));
        let err = crop_to_content(&png_bytes(&img)).unwrap_err();
        assert!(matches!(err, RenderError::MissingTarget));
    }

    #[tokio::test]
    async fn missing_browser_fails_at_use_not_discovery() {
        let sandbox = HeadlessChromium {
            executable: None,
            timeout: Duration::from_secs(1),
            viewport: (100, 100),
        };
        let err = sandbox
            .render_page("<html></html>", Capture::FullPage)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::LaunchFailed { .. }));
    }
}
