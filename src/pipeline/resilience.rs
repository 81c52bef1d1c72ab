//! Retry and safe-mode policy around the rendering adapter.
//!
//! Every render attempt passes through [`render_with_retry`]. The policy is
//! deliberately simple: a fixed delay between attempts, a shared failure
//! counter across the whole conversion, and a safe-mode latch that stops
//! issuing render work once the document has proven itself hostile. A render
//! that fails all attempts degrades to `None`; the caller keeps the original
//! markup text in place.

use crate::context::ConversionContext;
use crate::pipeline::render::{RenderRequest, RenderedImage, Renderer};
use std::time::Duration;
use tracing::{debug, warn};

/// Render one fragment under the retry and safe-mode policy.
///
/// Returns `Some` on success and `None` when the fragment could not be
/// rendered, either because safe mode suppressed the attempt or because
/// every attempt failed. Failures are counted in the context; a fragment
/// that exhausts its attempts escalates to safe mode once the cumulative
/// counter has reached the threshold.
pub async fn render_with_retry(
    renderer: &dyn Renderer,
    request: &RenderRequest,
    ctx: &ConversionContext,
) -> Option<RenderedImage> {
    let max_retries = ctx.config.max_retries;
    let delay = Duration::from_millis(ctx.config.retry_delay_ms);

    for attempt in 0..=max_retries {
        // Checked before every attempt, not just the first: another task may
        // have tripped the latch while this one was sleeping. A fragment's
        // own failures never flip the latch mid-loop (that happens only in
        // the exhausted branch below), so nothing cuts its attempt budget
        // short from the inside.
        if ctx.safe_mode() {
            debug!("safe mode active, skipping render of {:?}", request.kind);
            ctx.push_warning(format!(
                "safe mode: left fragment as literal text ({:?})",
                request.kind
            ));
            return None;
        }

        if attempt > 0 {
            tokio::time::sleep(delay).await;
        }

        match renderer.render(request, &ctx.asset_dir).await {
            Ok(image) => {
                ctx.record_success(&image, request.is_formula());
                return Some(image);
            }
            Err(e) => {
                warn!(
                    "render attempt {}/{} failed: {e}",
                    attempt + 1,
                    max_retries + 1
                );
                ctx.record_failure();
            }
        }
    }

    ctx.escalate();
    ctx.push_warning(format!(
        "render failed after {} attempts, left fragment as literal text",
        max_retries + 1
    ));
    None
}
