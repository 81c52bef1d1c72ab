//! Markdown token stream → document element sequence.
//!
//! A single pass over the `pulldown-cmark` events builds the flat
//! [`DocumentElement`] list the serializer consumes. Nested lists are
//! flattened to an indent depth here, and ordered-item numbering is resolved
//! to literal prefixes, so the serializer never needs numbering state.

use crate::element::{DocumentElement, InlineSpan, ListItem, ListMarker};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use tracing::trace;

/// Parse the preprocessed markup into body elements.
///
/// The boolean reports whether any heading was seen; front matter is gated
/// on it in [`assemble_document`].
pub fn assemble(markup: &str) -> (Vec<DocumentElement>, bool) {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = Parser::new_ext(markup, options);

    let mut builder = Builder::default();
    for event in parser {
        builder.event(event);
    }
    trace!("assembled {} elements", builder.elements.len());
    (builder.elements, builder.has_headings)
}

/// Prepend the front matter (title, table of contents, page break) when the
/// body contains headings; a heading-free document gets no front matter.
pub fn assemble_document(body: Vec<DocumentElement>, has_headings: bool) -> Vec<DocumentElement> {
    if !has_headings {
        return body;
    }
    let title = body
        .iter()
        .find_map(|el| match el {
            DocumentElement::Heading { text, .. } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "Document".to_string());

    let mut out = Vec::with_capacity(body.len() + 3);
    out.push(DocumentElement::Title { text: title });
    out.push(DocumentElement::Toc);
    out.push(DocumentElement::PageBreak);
    out.extend(body);
    out
}

/// One open list level: the running ordered counter (None for bullets) and
/// the spans of the item currently being collected, if any.
struct ListLevel {
    counter: Option<u64>,
    item_spans: Option<Vec<InlineSpan>>,
}

#[derive(Default)]
struct Builder {
    elements: Vec<DocumentElement>,
    has_headings: bool,

    spans: Vec<InlineSpan>,
    bold: u32,
    italic: u32,

    heading: Option<(u8, String)>,
    code_block: Option<String>,
    image: Option<(String, String)>,

    lists: Vec<ListLevel>,
    items: Vec<ListItem>,

    quote_depth: u32,
    quote_spans: Vec<InlineSpan>,

    table: Option<TableState>,
}

#[derive(Default)]
struct TableState {
    in_head: bool,
    cell: String,
    cells: Vec<String>,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Builder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => self.code_span(&code),
            Event::SoftBreak | Event::HardBreak => self.text(" "),
            Event::Rule => {}
            // HTML that survives preprocessing has no document mapping.
            Event::Html(_) | Event::InlineHtml(_) => {}
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.heading = Some((level as u8, String::new()));
            }
            Tag::Paragraph => {}
            Tag::Strong => self.bold += 1,
            Tag::Emphasis => self.italic += 1,
            Tag::Image { dest_url, .. } => {
                self.image = Some((dest_url.to_string(), String::new()));
            }
            Tag::CodeBlock(kind) => {
                if let CodeBlockKind::Fenced(lang) = &kind {
                    trace!("code block: {}", lang);
                }
                self.code_block = Some(String::new());
            }
            Tag::BlockQuote(..) => self.quote_depth += 1,
            Tag::List(start) => {
                self.flush_open_item();
                self.lists.push(ListLevel {
                    counter: start,
                    item_spans: None,
                });
            }
            Tag::Item => {
                if let Some(level) = self.lists.last_mut() {
                    level.item_spans = Some(Vec::new());
                }
            }
            Tag::Table(_) => self.table = Some(TableState::default()),
            Tag::TableHead => {
                if let Some(t) = self.table.as_mut() {
                    t.in_head = true;
                }
            }
            Tag::TableRow => {
                if let Some(t) = self.table.as_mut() {
                    t.cells.clear();
                }
            }
            Tag::TableCell => {
                if let Some(t) = self.table.as_mut() {
                    t.cell.clear();
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(..) => {
                if let Some((level, text)) = self.heading.take() {
                    self.has_headings = true;
                    self.elements.push(DocumentElement::Heading {
                        level,
                        text: text.trim().to_string(),
                    });
                }
            }
            TagEnd::Paragraph => self.flush_paragraph(),
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Image => {
                if let Some((path, alt)) = self.image.take() {
                    self.push_span(InlineSpan::Image { path, alt });
                }
            }
            TagEnd::CodeBlock => {
                if let Some(text) = self.code_block.take() {
                    self.elements.push(DocumentElement::CodeBlock {
                        text: text.trim_end_matches('\n').to_string(),
                    });
                }
            }
            TagEnd::BlockQuote(..) => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                if self.quote_depth == 0 && !self.quote_spans.is_empty() {
                    let spans = std::mem::take(&mut self.quote_spans);
                    self.elements.push(DocumentElement::Blockquote { spans });
                }
            }
            TagEnd::Item => self.flush_open_item(),
            TagEnd::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() && !self.items.is_empty() {
                    let items = std::mem::take(&mut self.items);
                    self.elements.push(DocumentElement::List { items });
                }
            }
            TagEnd::TableCell => {
                if let Some(t) = self.table.as_mut() {
                    let cell = std::mem::take(&mut t.cell);
                    t.cells.push(cell.trim().to_string());
                }
            }
            TagEnd::TableHead => {
                if let Some(t) = self.table.as_mut() {
                    t.header = std::mem::take(&mut t.cells);
                    t.in_head = false;
                }
            }
            TagEnd::TableRow => {
                if let Some(t) = self.table.as_mut() {
                    if !t.in_head {
                        let row = std::mem::take(&mut t.cells);
                        t.rows.push(row);
                    }
                }
            }
            TagEnd::Table => {
                if let Some(t) = self.table.take() {
                    self.elements.push(DocumentElement::Table {
                        header: t.header,
                        rows: t.rows,
                    });
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(buf) = self.code_block.as_mut() {
            buf.push_str(text);
        } else if let Some(t) = self.table.as_mut() {
            t.cell.push_str(text);
        } else if let Some((_, buf)) = self.heading.as_mut() {
            buf.push_str(text);
        } else if let Some((_, alt)) = self.image.as_mut() {
            alt.push_str(text);
        } else {
            let span = self.styled(text);
            self.push_span(span);
        }
    }

    fn code_span(&mut self, code: &str) {
        if let Some(t) = self.table.as_mut() {
            t.cell.push_str(code);
        } else if let Some((_, buf)) = self.heading.as_mut() {
            buf.push_str(code);
        } else {
            self.push_span(InlineSpan::Code(code.to_string()));
        }
    }

    fn styled(&self, text: &str) -> InlineSpan {
        if self.bold > 0 {
            InlineSpan::Bold(text.to_string())
        } else if self.italic > 0 {
            InlineSpan::Italic(text.to_string())
        } else {
            InlineSpan::Text(text.to_string())
        }
    }

    /// Route a finished span to the innermost open container.
    fn push_span(&mut self, span: InlineSpan) {
        if let Some(spans) = self
            .lists
            .last_mut()
            .and_then(|level| level.item_spans.as_mut())
        {
            spans.push(span);
        } else if self.quote_depth > 0 {
            self.quote_spans.push(span);
        } else {
            self.spans.push(span);
        }
    }

    fn flush_paragraph(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.spans);
        // A paragraph that is exactly one image becomes a block-level
        // image reference (centered, no indent, own caption handling).
        if spans.len() == 1 {
            if let InlineSpan::Image { path, alt } = &spans[0] {
                self.elements.push(DocumentElement::ImageReference {
                    path: path.clone(),
                    alt: alt.clone(),
                });
                return;
            }
        }
        self.elements.push(DocumentElement::Paragraph { spans });
    }

    /// Emit the item currently being collected, if any. Called both at
    /// `End(Item)` and when a nested list opens, so a parent item's own text
    /// lands before its children instead of after them.
    fn flush_open_item(&mut self) {
        let depth = self.lists.len().saturating_sub(1) as u8;
        if let Some(level) = self.lists.last_mut() {
            if let Some(spans) = level.item_spans.take() {
                let marker = match level.counter.as_mut() {
                    Some(n) => {
                        let current = *n;
                        *n += 1;
                        ListMarker::Number(current)
                    }
                    None => ListMarker::Bullet,
                };
                if !spans.is_empty() {
                    self.items.push(ListItem {
                        depth,
                        marker,
                        spans,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_paragraphs() {
        let (els, has) = assemble("# Top\n\nSome *styled* and **strong** text.\n");
        assert!(has);
        assert_eq!(
            els[0],
            DocumentElement::Heading {
                level: 1,
                text: "Top".into()
            }
        );
        match &els[1] {
            DocumentElement::Paragraph { spans } => {
                assert!(spans.contains(&InlineSpan::Italic("styled".into())));
                assert!(spans.contains(&InlineSpan::Bold("strong".into())));
            }
            other => panic!("expected paragraph, got {other:?}"),
        }
    }

    #[test]
    fn heading_free_markup_reports_no_headings() {
        let (els, has) = assemble("just a line of text");
        assert!(!has);
        assert_eq!(els.len(), 1);
    }

    #[test]
    fn ordered_list_numbers_run_from_start() {
        let (els, _) = assemble("3. third\n4. fourth\n");
        match &els[0] {
            DocumentElement::List { items } => {
                assert_eq!(items[0].marker, ListMarker::Number(3));
                assert_eq!(items[1].marker, ListMarker::Number(4));
                assert_eq!(items[0].marker.prefix(), "3. ");
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn nested_list_flattens_to_depth() {
        let (els, _) = assemble("- outer\n  - inner\n- second\n");
        match &els[0] {
            DocumentElement::List { items } => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].depth, 0);
                assert_eq!(items[1].depth, 1);
                assert_eq!(items[2].depth, 0);
                // The parent's text precedes its children.
                assert_eq!(items[0].spans[0], InlineSpan::Text("outer".into()));
                assert_eq!(items[1].spans[0], InlineSpan::Text("inner".into()));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn table_header_and_rows_are_split() {
        let (els, _) = assemble("| A | B |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |\n");
        match &els[0] {
            DocumentElement::Table { header, rows } => {
                assert_eq!(header, &vec!["A".to_string(), "B".to_string()]);
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1], vec!["3".to_string(), "4".to_string()]);
            }
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn image_only_paragraph_is_a_block_reference() {
        let (els, _) = assemble("![alt text](temp_images/math_1.png)\n");
        assert_eq!(
            els[0],
            DocumentElement::ImageReference {
                path: "temp_images/math_1.png".into(),
                alt: "alt text".into()
            }
        );
    }

    #[test]
    fn bracketed_image_destination_keeps_its_spaces() {
        let (els, _) = assemble("![chart](</tmp/render scratch/svg_1.png>)\n");
        assert_eq!(
            els[0],
            DocumentElement::ImageReference {
                path: "/tmp/render scratch/svg_1.png".into(),
                alt: "chart".into()
            }
        );
    }

    #[test]
    fn inline_image_stays_a_span() {
        let (els, _) = assemble("see ![f](x.png) here\n");
        match &els[0] {
            DocumentElement::Paragraph { spans } => {
                assert!(spans
                    .iter()
                    .any(|s| matches!(s, InlineSpan::Image { path, .. } if path == "x.png")));
            }
            other => panic!("expected paragraph, got {other:?}"),
        }
    }

    #[test]
    fn code_block_preserves_lines() {
        let (els, _) = assemble("```rust\nlet x = 1;\nlet y = 2;\n```\n");
        assert_eq!(
            els[0],
            DocumentElement::CodeBlock {
                text: "let x = 1;\nlet y = 2;".into()
            }
        );
    }

    #[test]
    fn blockquote_collects_spans() {
        let (els, _) = assemble("> quoted words\n");
        match &els[0] {
            DocumentElement::Blockquote { spans } => {
                assert_eq!(spans[0], InlineSpan::Text("quoted words".into()));
            }
            other => panic!("expected blockquote, got {other:?}"),
        }
    }

    #[test]
    fn front_matter_gated_on_headings() {
        let (body, has) = assemble("# Report\n\ntext\n");
        let doc = assemble_document(body, has);
        assert_eq!(
            doc[0],
            DocumentElement::Title {
                text: "Report".into()
            }
        );
        assert_eq!(doc[1], DocumentElement::Toc);
        assert_eq!(doc[2], DocumentElement::PageBreak);

        let (body, has) = assemble("plain text\n");
        let doc = assemble_document(body, has);
        assert!(!doc
            .iter()
            .any(|el| matches!(el, DocumentElement::Toc | DocumentElement::PageBreak)));
    }

    #[test]
    fn unreplaced_math_survives_as_text() {
        let (els, _) = assemble("value $x = 1$ here\n");
        match &els[0] {
            DocumentElement::Paragraph { spans } => {
                let text: String = spans.iter().map(|s| s.text()).collect();
                assert_eq!(text, "value $x = 1$ here");
            }
            other => panic!("expected paragraph, got {other:?}"),
        }
    }
}
