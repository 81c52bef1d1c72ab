//! Conversion entry points and the document-level safe-mode fallback.
//!
//! The staged pipeline is: preprocess (render substitutions) → assemble
//! (markdown → elements) → serialize (elements → DOCX bytes). When the whole
//! pipeline fails, it is retried exactly once on a cloned configuration with
//! every rendering pass disabled; the caller's configuration is never
//! touched, so their toggles survive the fallback by construction.

use crate::config::ConversionConfig;
use crate::context::ConversionContext;
use crate::error::Md2DocxError;
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::assemble::{assemble, assemble_document};
use crate::pipeline::preprocess::preprocess;
use crate::pipeline::render::{RenderAdapter, Renderer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a markdown string to a DOCX document.
///
/// Relative image paths in the markdown resolve against the process working
/// directory. Render assets are written to a scratch directory that is
/// removed when the conversion finishes; the generated images survive in
/// [`ConversionOutput::images`] as in-memory bytes.
pub async fn convert(
    markdown: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    let scratch = tempfile::tempdir()
        .map_err(|e| Md2DocxError::Internal(format!("cannot create scratch dir: {e}")))?;
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    convert_impl(markdown, &base_dir, Some(scratch.path()), config).await
}

/// Convert a markdown string, resolving relative image paths (and writing
/// render assets) under `base_dir`.
pub async fn convert_with_base(
    markdown: &str,
    base_dir: &Path,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    convert_impl(markdown, base_dir, None, config).await
}

async fn convert_impl(
    markdown: &str,
    base_dir: &Path,
    asset_dir: Option<&Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    match run_pipeline(markdown, base_dir, asset_dir, config).await {
        Ok(output) => Ok(output),
        Err(first) if !config.safe_mode => {
            warn!("conversion failed ({first}), retrying once in safe mode");
            let mut fallback = config.clone();
            fallback.math_to_image = false;
            fallback.render_svg = false;
            fallback.safe_mode = true;
            run_pipeline(markdown, base_dir, asset_dir, &fallback)
                .await
                .map_err(|second| Md2DocxError::SafeModeFailed {
                    first: first.to_string(),
                    detail: second.to_string(),
                })
        }
        Err(e) => Err(e),
    }
}

/// Convert a markdown file. The file's parent directory becomes the base
/// directory, so images referenced relative to the document resolve.
pub async fn convert_file(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Md2DocxError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let markdown =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Md2DocxError::InputReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
    let base_dir = parent_dir(path);
    convert_with_base(&markdown, &base_dir, config).await
}

/// Convert a markdown string and write the DOCX to `output_path`.
///
/// The write is atomic: bytes land in a temporary sibling file that is
/// renamed over the destination, so a crash mid-write never leaves a
/// truncated document behind.
pub async fn convert_to_file(
    markdown: &str,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    let output_path = output_path.as_ref();
    let output = convert(markdown, config).await?;

    let dir = parent_dir(output_path);
    let write = || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        std::io::Write::write_all(&mut tmp, &output.docx)?;
        tmp.persist(output_path).map_err(|e| e.error)?;
        Ok(())
    };
    write().map_err(|source| Md2DocxError::OutputWriteFailed {
        path: output_path.to_path_buf(),
        source,
    })?;
    info!(
        "wrote {} bytes to {}",
        output.docx.len(),
        output_path.display()
    );
    Ok(output)
}

/// Blocking wrapper for callers without an async runtime.
pub fn convert_sync(
    markdown: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Md2DocxError::Internal(format!("failed to start runtime: {e}")))?;
    runtime.block_on(convert(markdown, config))
}

async fn run_pipeline(
    markdown: &str,
    base_dir: &Path,
    asset_dir: Option<&Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2DocxError> {
    let started = Instant::now();
    info!(
        bytes = markdown.len(),
        safe_mode = config.safe_mode,
        "starting markdown conversion"
    );

    let mut ctx = ConversionContext::new(base_dir.to_path_buf(), config.clone());
    if let Some(dir) = asset_dir {
        ctx = ctx.with_asset_dir(dir.to_path_buf());
    }

    let t = Instant::now();
    let preprocessed = if config.wants_rendering() {
        let renderer = resolve_renderer(config);
        preprocess(markdown, renderer.as_ref(), &ctx).await
    } else {
        markdown.to_string()
    };
    let preprocess_duration_ms = t.elapsed().as_millis() as u64;
    debug!(
        duration_ms = preprocess_duration_ms,
        "preprocessing complete"
    );

    let t = Instant::now();
    let (body, has_headings) = assemble(&preprocessed);
    let elements = assemble_document(body, has_headings);
    let docx = crate::docx::serialize(&elements, &ctx)?;
    let assemble_duration_ms = t.elapsed().as_millis() as u64;
    debug!(
        duration_ms = assemble_duration_ms,
        elements = elements.len(),
        "assembly and serialization complete"
    );

    let safe_mode = ctx.safe_mode();
    let metrics = ctx.metrics();
    let (images, warnings) = ctx.into_collected();
    let stats = ConversionStats {
        formulas_rendered: metrics.formulas_rendered,
        graphics_rendered: metrics.graphics_rendered,
        render_failures: metrics.render_failures,
        safe_mode,
        preprocess_duration_ms,
        assemble_duration_ms,
        total_duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        total_ms = stats.total_duration_ms,
        formulas = stats.formulas_rendered,
        graphics = stats.graphics_rendered,
        failures = stats.render_failures,
        "conversion complete"
    );

    Ok(ConversionOutput {
        docx,
        elements,
        images,
        warnings,
        stats,
    })
}

/// The injected renderer when one was configured, otherwise the default
/// chromium-backed adapter.
fn resolve_renderer(config: &ConversionConfig) -> Arc<dyn Renderer> {
    match &config.renderer {
        Some(renderer) => Arc::clone(renderer),
        None => Arc::new(RenderAdapter::from_config(config)),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_bare_filename_is_cwd() {
        assert_eq!(parent_dir(Path::new("out.docx")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("a/b/out.docx")), PathBuf::from("a/b"));
    }

    #[tokio::test]
    async fn convert_file_reports_missing_input() {
        let err = convert_file("/no/such/file.md", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Md2DocxError::FileNotFound { .. }));
    }
}
