//! Per-conversion state: [`ConversionContext`] and [`FailureState`].
//!
//! One `ConversionContext` is owned by one conversion invocation and never
//! shared across concurrent conversions — that keeps the failure counters
//! conversion-local instead of ambient process state, so one tenant's flaky
//! renders cannot push another tenant into safe mode.
//!
//! Substitution transforms run concurrently on the async runtime, so the
//! mutable parts sit behind `std::sync::Mutex`es. Locks are only ever held
//! for a counter bump or a push and never across an `.await`.

use crate::config::ConversionConfig;
use crate::output::ImageAsset;
use crate::pipeline::render::RenderedImage;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Cumulative render failures before safe mode turns on for the remainder
/// of the conversion.
pub const SAFE_MODE_THRESHOLD: u32 = 5;

/// Name of the asset directory created under the conversion base directory.
pub const ASSET_DIR_NAME: &str = "temp_images";

/// Cumulative failure tracking for one conversion.
///
/// Mutated only by the resilience controller: every render failure
/// increments the counter and every success resets it to zero. `safe_mode`
/// flips when a fragment exhausts its retries with the counter at or above
/// [`SAFE_MODE_THRESHOLD`], and stays on for the rest of the conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureState {
    /// Cumulative failed render attempts since the last success.
    pub failures: u32,
    /// Whether rendering-dependent substitutions are short-circuited.
    pub safe_mode: bool,
}

/// Per-fragment render counters for the final stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderMetrics {
    pub formulas_rendered: usize,
    pub graphics_rendered: usize,
    pub render_failures: usize,
}

/// The per-document state bag threading through one conversion invocation.
pub struct ConversionContext {
    /// Directory against which relative image paths resolve.
    pub base_dir: PathBuf,
    /// Where generated render assets land (`base_dir/temp_images` unless
    /// redirected via [`ConversionContext::with_asset_dir`]).
    pub asset_dir: PathBuf,
    /// The active option set for this conversion.
    pub config: ConversionConfig,
    failures: Mutex<FailureState>,
    images: Mutex<Vec<ImageAsset>>,
    warnings: Mutex<Vec<String>>,
    metrics: Mutex<RenderMetrics>,
}

/// Lock helper that shrugs off poisoning: a panicked transform already
/// aborted its own future, and the guarded values are plain counters.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ConversionContext {
    pub fn new(base_dir: PathBuf, config: ConversionConfig) -> Self {
        // Asset paths are spliced into the markup as-is, so they must stay
        // valid regardless of what the base dir later resolves against.
        let asset_dir = base_dir.join(ASSET_DIR_NAME);
        let asset_dir = std::path::absolute(&asset_dir).unwrap_or(asset_dir);
        Self {
            base_dir,
            asset_dir,
            config,
            failures: Mutex::new(FailureState::default()),
            images: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            metrics: Mutex::new(RenderMetrics::default()),
        }
    }

    /// Redirect generated render assets to a different directory, e.g. a
    /// scratch dir that lives only as long as the conversion.
    pub fn with_asset_dir(mut self, dir: PathBuf) -> Self {
        self.asset_dir = dir;
        self
    }

    /// Whether rendering is currently short-circuited, either because the
    /// caller forced safe mode or because failures crossed the threshold.
    pub fn safe_mode(&self) -> bool {
        self.config.safe_mode || lock(&self.failures).safe_mode
    }

    /// Snapshot of the failure counters.
    pub fn failure_state(&self) -> FailureState {
        *lock(&self.failures)
    }

    /// Snapshot of the render metrics.
    pub fn metrics(&self) -> RenderMetrics {
        *lock(&self.metrics)
    }

    /// Record one failed render attempt.
    pub fn record_failure(&self) {
        lock(&self.metrics).render_failures += 1;
        lock(&self.failures).failures += 1;
    }

    /// Flip safe mode if the cumulative failure counter has reached
    /// [`SAFE_MODE_THRESHOLD`]. Called once a fragment has exhausted its
    /// retries, never mid-attempt, so a fragment always gets its full
    /// attempt budget even when its own failures cross the threshold.
    /// Returns true when this call is the one that tripped the latch.
    pub fn escalate(&self) -> bool {
        let mut state = lock(&self.failures);
        if !state.safe_mode && state.failures >= SAFE_MODE_THRESHOLD {
            state.safe_mode = true;
            warn!(
                failures = state.failures,
                "cumulative render failures crossed threshold, enabling safe mode"
            );
            return true;
        }
        false
    }

    /// Record a successful render: reset the cumulative failure counter and
    /// keep the generated asset for the output's image list.
    pub fn record_success(&self, image: &RenderedImage, formula: bool) {
        lock(&self.failures).failures = 0;
        {
            let mut metrics = lock(&self.metrics);
            if formula {
                metrics.formulas_rendered += 1;
            } else {
                metrics.graphics_rendered += 1;
            }
        }
        lock(&self.images).push(ImageAsset {
            filename: image.filename.clone(),
            path: image.path.clone(),
            bytes: image.bytes.clone(),
            content_type: "image/png".to_string(),
            width: image.width,
            height: image.height,
        });
    }

    pub fn push_warning(&self, message: String) {
        lock(&self.warnings).push(message);
    }

    /// Drain accumulated warnings and image assets out of the context once
    /// the pipeline is done with it.
    pub fn into_collected(self) -> (Vec<ImageAsset>, Vec<String>) {
        (
            self.images.into_inner().unwrap_or_else(|e| e.into_inner()),
            self.warnings.into_inner().unwrap_or_else(|e| e.into_inner()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn ctx() -> ConversionContext {
        ConversionContext::new(PathBuf::from("."), ConversionConfig::default())
    }

    fn img() -> RenderedImage {
        RenderedImage {
            path: Path::new("temp_images/math_1.png").to_path_buf(),
            filename: "math_1.png".into(),
            bytes: vec![1, 2, 3],
            width: 10,
            height: 10,
        }
    }

    #[test]
    fn escalate_trips_safe_mode_only_at_threshold() {
        let ctx = ctx();
        for _ in 0..SAFE_MODE_THRESHOLD - 1 {
            ctx.record_failure();
            assert!(!ctx.escalate());
            assert!(!ctx.safe_mode());
        }
        ctx.record_failure();
        // The counter alone never flips the latch.
        assert!(!ctx.safe_mode());
        assert!(ctx.escalate(), "fifth failure trips safe mode on escalate");
        assert!(ctx.safe_mode());
        // Already tripped; further escalations do not re-report.
        ctx.record_failure();
        assert!(!ctx.escalate());
    }

    #[test]
    fn success_resets_counter() {
        let ctx = ctx();
        ctx.record_failure();
        ctx.record_failure();
        assert_eq!(ctx.failure_state().failures, 2);
        ctx.record_success(&img(), true);
        assert_eq!(ctx.failure_state().failures, 0);
        assert!(!ctx.safe_mode());
        assert_eq!(ctx.metrics().formulas_rendered, 1);
    }

    #[test]
    fn asset_dir_is_absolute_and_overridable() {
        let ctx = ctx();
        assert!(ctx.asset_dir.is_absolute());
        let scratch = std::env::temp_dir().join("elsewhere");
        let ctx = ctx.with_asset_dir(scratch.clone());
        assert_eq!(ctx.asset_dir, scratch);
    }

    #[test]
    fn config_safe_mode_wins() {
        let mut config = ConversionConfig::default();
        config.safe_mode = true;
        let ctx = ConversionContext::new(PathBuf::from("."), config);
        assert!(ctx.safe_mode());
        assert_eq!(ctx.failure_state().failures, 0);
    }

    #[test]
    fn collected_assets_and_warnings() {
        let ctx = ctx();
        ctx.record_success(&img(), false);
        ctx.push_warning("one warning".into());
        let (images, warnings) = ctx.into_collected();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].content_type, "image/png");
        assert_eq!(warnings, vec!["one warning".to_string()]);
    }
}
