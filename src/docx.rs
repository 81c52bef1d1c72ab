//! Element sequence → binary DOCX serialization.
//!
//! The layout constants here (heading sizes, indents, the 90 % table width,
//! the `E6E6E6` header shading) define the house document style; everything
//! configurable comes in through [`ConversionConfig`].
//!
//! Serialization never fails on a bad image: an unreadable or undecodable
//! image reference degrades to a literal `[image: alt]` run with a warning,
//! so one missing asset cannot take down the whole document.

use crate::context::ConversionContext;
use crate::element::{DocumentElement, InlineSpan, ListItem};
use crate::error::Md2DocxError;
use docx_rs::{
    AlignmentType, BreakType, Docx, LineSpacing, PageMargin, Paragraph, Pic, Run, RunFonts,
    Shading, ShdType, SpecialIndentType, Style, StyleType, Table, TableAlignmentType, TableCell,
    TableLayoutType, TableOfContents, TableRow, WidthType,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Heading font sizes in half-points, indexed by level (1-based; deeper
/// levels reuse the last entry).
const HEADING_SIZES: [usize; 3] = [32, 28, 24];
/// Heading levels rendered centered rather than left-aligned.
const CENTERED_HEADING_MAX_LEVEL: u8 = 2;
/// First-line indent of justified body paragraphs, in twips.
const FIRST_LINE_INDENT: i32 = 240;
/// Left indent per list nesting level and for blockquotes, in twips.
const INDENT_STEP: i32 = 720;
/// Table width in fiftieths of a percent (4500 = 90 %).
const TABLE_WIDTH_PCT: usize = 4500;
const TABLE_HEADER_SHADE: &str = "E6E6E6";
const MONOSPACE_FONT: &str = "Courier New";
/// Pixels → English Metric Units.
const EMU_PER_PX: u32 = 9525;

/// Serialize the element sequence into DOCX bytes.
///
/// Relative image paths resolve against the context's base directory.
pub fn serialize(
    elements: &[DocumentElement],
    ctx: &ConversionContext,
) -> Result<Vec<u8>, Md2DocxError> {
    let config = &ctx.config;
    let (page_w, page_h) = config.page_size.dimensions();

    let mut docx = Docx::new()
        .page_size(page_w, page_h)
        .page_margin(
            PageMargin::new()
                .top(config.margins.top)
                .bottom(config.margins.bottom)
                .left(config.margins.left)
                .right(config.margins.right),
        )
        .default_fonts(RunFonts::new().ascii(&config.font))
        .default_size(config.font_size);
    for style in heading_styles() {
        docx = docx.add_style(style);
    }

    for element in elements {
        docx = match element {
            DocumentElement::Heading { level, text } => {
                docx.add_paragraph(heading_paragraph(*level, text))
            }
            DocumentElement::Paragraph { spans } => {
                docx.add_paragraph(body_paragraph(spans, ctx))
            }
            DocumentElement::Table { header, rows } => {
                // Word glues a table to an adjacent paragraph without these.
                docx.add_paragraph(spacer())
                    .add_table(build_table(header, rows))
                    .add_paragraph(spacer())
            }
            DocumentElement::List { items } => {
                let mut d = docx;
                for item in items {
                    d = d.add_paragraph(list_paragraph(item, ctx));
                }
                d
            }
            DocumentElement::CodeBlock { text } => {
                let mut d = docx;
                for line in text.lines() {
                    d = d.add_paragraph(code_line(line));
                }
                d
            }
            DocumentElement::Blockquote { spans } => {
                docx.add_paragraph(blockquote_paragraph(spans, ctx))
            }
            DocumentElement::ImageReference { path, alt } => {
                docx.add_paragraph(
                    Paragraph::new()
                        .align(AlignmentType::Center)
                        .add_run(image_run(path, alt, ctx)),
                )
            }
            DocumentElement::Title { text } => docx.add_paragraph(
                Paragraph::new()
                    .align(AlignmentType::Center)
                    .add_run(Run::new().add_text(text).bold().size(40)),
            ),
            DocumentElement::Toc => docx.add_table_of_contents(table_of_contents()),
            DocumentElement::PageBreak => {
                docx.add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)))
            }
        };
    }

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|e| Md2DocxError::Pack {
            detail: e.to_string(),
        })?;
    let bytes = cursor.into_inner();
    debug!("packed DOCX archive: {} bytes", bytes.len());
    Ok(bytes)
}

/// Word refreshes the TOC field on open; entries link back to their
/// headings so the table is navigable, not just a page listing.
fn table_of_contents() -> TableOfContents {
    TableOfContents::new()
        .heading_styles_range(1, 3)
        .alias("Table of Contents")
        .hyperlink()
        .auto()
}

fn heading_styles() -> Vec<Style> {
    (1..=6u8)
        .map(|level| {
            let size = HEADING_SIZES[usize::from(level.min(3)) - 1];
            let style = Style::new(format!("Heading{level}"), StyleType::Paragraph)
                .name(format!("Heading {level}"))
                .size(size)
                .bold();
            if level <= CENTERED_HEADING_MAX_LEVEL {
                style.align(AlignmentType::Center)
            } else {
                style.align(AlignmentType::Left)
            }
        })
        .collect()
}

fn heading_paragraph(level: u8, text: &str) -> Paragraph {
    let level = level.clamp(1, 6);
    Paragraph::new()
        .style(&format!("Heading{level}"))
        .add_run(Run::new().add_text(text))
}

fn body_paragraph(spans: &[InlineSpan], ctx: &ConversionContext) -> Paragraph {
    let has_image = spans.iter().any(|s| matches!(s, InlineSpan::Image { .. }));
    // 360 = 1.5 lines (240ths of a line).
    let mut p = Paragraph::new().line_spacing(LineSpacing::new().line(360));
    p = if has_image {
        p.align(AlignmentType::Center)
    } else {
        p.align(AlignmentType::Justified).indent(
            None,
            Some(SpecialIndentType::FirstLine(FIRST_LINE_INDENT)),
            None,
            None,
        )
    };
    for span in spans {
        p = p.add_run(span_run(span, ctx));
    }
    p
}

fn list_paragraph(item: &ListItem, ctx: &ConversionContext) -> Paragraph {
    let indent = INDENT_STEP * (i32::from(item.depth) + 1);
    let mut p = Paragraph::new()
        .indent(Some(indent), None, None, None)
        .add_run(Run::new().add_text(item.marker.prefix()));
    for span in &item.spans {
        p = p.add_run(span_run(span, ctx));
    }
    p
}

fn blockquote_paragraph(spans: &[InlineSpan], ctx: &ConversionContext) -> Paragraph {
    let mut p = Paragraph::new().indent(Some(INDENT_STEP), None, None, None);
    for span in spans {
        p = p.add_run(span_run(span, ctx).italic());
    }
    p
}

fn code_line(line: &str) -> Paragraph {
    Paragraph::new().add_run(
        Run::new()
            .add_text(line)
            .fonts(RunFonts::new().ascii(MONOSPACE_FONT)),
    )
}

fn spacer() -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(""))
}

fn span_run(span: &InlineSpan, ctx: &ConversionContext) -> Run {
    match span {
        InlineSpan::Text(t) => Run::new().add_text(t),
        InlineSpan::Bold(t) => Run::new().add_text(t).bold(),
        InlineSpan::Italic(t) => Run::new().add_text(t).italic(),
        InlineSpan::Code(t) => Run::new()
            .add_text(t)
            .fonts(RunFonts::new().ascii(MONOSPACE_FONT))
            .highlight("lightGray"),
        InlineSpan::Image { path, alt } => image_run(path, alt, ctx),
    }
}

/// Load, fit, and embed an image; degrade to a text run when unreadable.
fn image_run(path: &str, alt: &str, ctx: &ConversionContext) -> Run {
    match load_fitted(path, ctx) {
        Ok((bytes, w_px, h_px)) => Run::new().add_image(
            Pic::new(&bytes).size(w_px * EMU_PER_PX, h_px * EMU_PER_PX),
        ),
        Err(e) => {
            warn!("image '{path}' could not be embedded: {e}");
            ctx.push_warning(format!("image '{path}' could not be embedded: {e}"));
            Run::new().add_text(format!("[image: {alt}]"))
        }
    }
}

/// Read the image bytes and compute display dimensions fitted inside the
/// configured maximums, preserving aspect ratio and never enlarging.
fn load_fitted(path: &str, ctx: &ConversionContext) -> Result<(Vec<u8>, u32, u32), String> {
    let resolved = resolve(path, &ctx.base_dir);
    let bytes = std::fs::read(&resolved).map_err(|e| e.to_string())?;
    let (w, h) = image::load_from_memory(&bytes)
        .map(|img| (img.width(), img.height()))
        .map_err(|e| e.to_string())?;
    if w == 0 || h == 0 {
        return Err("image has zero dimensions".to_string());
    }
    let max_w = ctx.config.max_image_width as f64;
    let max_h = ctx.config.max_image_height as f64;
    let scale = (max_w / f64::from(w)).min(max_h / f64::from(h)).min(1.0);
    let w_px = (f64::from(w) * scale).round().max(1.0) as u32;
    let h_px = (f64::from(h) * scale).round().max(1.0) as u32;
    Ok((bytes, w_px, h_px))
}

fn resolve(path: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn build_table(header: &[String], rows: &[Vec<String>]) -> Table {
    let columns = header
        .len()
        .max(rows.iter().map(Vec::len).max().unwrap_or(0))
        .max(1);

    let mut table_rows = Vec::with_capacity(rows.len() + 1);
    table_rows.push(TableRow::new(
        (0..columns)
            .map(|i| {
                let text = header.get(i).map(String::as_str).unwrap_or("");
                TableCell::new()
                    .shading(
                        Shading::new()
                            .shd_type(ShdType::Clear)
                            .fill(TABLE_HEADER_SHADE),
                    )
                    .add_paragraph(
                        Paragraph::new()
                            .align(AlignmentType::Center)
                            .add_run(Run::new().add_text(text).bold()),
                    )
            })
            .collect(),
    ));
    for row in rows {
        table_rows.push(TableRow::new(
            (0..columns)
                .map(|i| {
                    let text = row.get(i).map(String::as_str).unwrap_or("");
                    TableCell::new()
                        .add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)))
                })
                .collect(),
        ));
    }

    Table::new(table_rows)
        .width(TABLE_WIDTH_PCT, WidthType::Pct)
        .layout(TableLayoutType::Fixed)
        .align(TableAlignmentType::Center)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::element::ListMarker;
    use std::path::PathBuf;

    fn ctx() -> ConversionContext {
        ConversionContext::new(PathBuf::from("."), ConversionConfig::default())
    }

    fn is_zip(bytes: &[u8]) -> bool {
        bytes.starts_with(b"PK")
    }

    #[test]
    fn empty_document_packs() {
        let bytes = serialize(&[], &ctx()).unwrap();
        assert!(is_zip(&bytes));
    }

    #[test]
    fn full_element_mix_packs() {
        let elements = vec![
            DocumentElement::Title {
                text: "Report".into(),
            },
            DocumentElement::Toc,
            DocumentElement::PageBreak,
            DocumentElement::Heading {
                level: 1,
                text: "Report".into(),
            },
            DocumentElement::Paragraph {
                spans: vec![
                    InlineSpan::Text("plain ".into()),
                    InlineSpan::Bold("bold".into()),
                    InlineSpan::Code("x".into()),
                ],
            },
            DocumentElement::Table {
                header: vec!["A".into(), "B".into()],
                rows: vec![vec!["1".into(), "2".into()]],
            },
            DocumentElement::List {
                items: vec![ListItem {
                    depth: 0,
                    marker: ListMarker::Bullet,
                    spans: vec![InlineSpan::Text("item".into())],
                }],
            },
            DocumentElement::CodeBlock {
                text: "let x = 1;\nlet y = 2;".into(),
            },
            DocumentElement::Blockquote {
                spans: vec![InlineSpan::Text("quote".into())],
            },
        ];
        let bytes = serialize(&elements, &ctx()).unwrap();
        assert!(is_zip(&bytes));
        assert!(bytes.len() > 1000, "non-trivial archive");
    }

    #[test]
    fn table_of_contents_is_hyperlinked() {
        let toc = table_of_contents();
        let debug = format!("{toc:?}");
        assert!(debug.contains("hyperlink: true"), "{debug}");
        assert!(debug.contains("auto: true"), "{debug}");
    }

    #[test]
    fn missing_image_degrades_to_text_run() {
        let ctx = ctx();
        let elements = vec![DocumentElement::ImageReference {
            path: "does/not/exist.png".into(),
            alt: "chart".into(),
        }];
        let bytes = serialize(&elements, &ctx).unwrap();
        assert!(is_zip(&bytes));
        let (_, warnings) = ctx.into_collected();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("does/not/exist.png"));
    }

    #[test]
    fn ragged_table_rows_are_padded() {
        let elements = vec![DocumentElement::Table {
            header: vec!["A".into(), "B".into(), "C".into()],
            rows: vec![vec!["1".into()]],
        }];
        assert!(serialize(&elements, &ctx()).is_ok());
    }
}
