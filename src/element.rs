//! The intermediate document tree: [`DocumentElement`] and [`InlineSpan`].
//!
//! The assembly stage maps markdown tokens into this flat element sequence;
//! the DOCX serializer consumes it. Keeping the tree explicit (rather than
//! building `docx-rs` objects straight from parser events) makes document
//! structure assertable in tests without unzipping the output archive.

/// One block-level element of the output document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentElement {
    /// Section heading. Levels 1–2 render centered, deeper levels left-aligned.
    Heading { level: u8, text: String },
    /// Body paragraph of inline spans. A paragraph containing an image span
    /// is centered with no first-line indent; otherwise justified.
    Paragraph { spans: Vec<InlineSpan> },
    /// Pipe table: shaded bold header row plus plain body rows.
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// Flattened list: nesting is indentation, not hierarchy.
    List { items: Vec<ListItem> },
    /// Fenced or indented code block, monospaced.
    CodeBlock { text: String },
    /// Quoted paragraph, indented.
    Blockquote { spans: Vec<InlineSpan> },
    /// A standalone image (a paragraph whose only content is one image).
    ImageReference { path: String, alt: String },
    /// Front-matter title page line. Emitted only when the document has
    /// headings.
    Title { text: String },
    /// Hyperlinked table of contents over heading levels 1–3.
    Toc,
    /// Explicit page break (after the table of contents).
    PageBreak,
}

/// One inline run inside a paragraph, list item, or blockquote.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineSpan {
    Text(String),
    Bold(String),
    Italic(String),
    /// Inline code, monospaced with light shading.
    Code(String),
    /// Inline image reference; `path` is absolute or relative to the
    /// conversion base directory.
    Image { path: String, alt: String },
}

impl InlineSpan {
    /// The plain text carried by this span (image spans contribute nothing).
    pub fn text(&self) -> &str {
        match self {
            InlineSpan::Text(t)
            | InlineSpan::Bold(t)
            | InlineSpan::Italic(t)
            | InlineSpan::Code(t) => t,
            InlineSpan::Image { .. } => "",
        }
    }
}

/// One item of a (flattened) list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    /// Nesting depth, 0 for the outermost list. Rendered as indentation.
    pub depth: u8,
    /// Marker rendered before the item text.
    pub marker: ListMarker,
    pub spans: Vec<InlineSpan>,
}

/// List item marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMarker {
    /// Ordered item: `{n}. ` with a running counter per list.
    Number(u64),
    /// Unordered item: a fixed bullet glyph.
    Bullet,
}

impl ListMarker {
    /// The literal prefix string placed before the item text.
    pub fn prefix(&self) -> String {
        match self {
            ListMarker::Number(n) => format!("{n}. "),
            ListMarker::Bullet => "• ".to_string(),
        }
    }
}

impl DocumentElement {
    /// Concatenated plain text of this element, used by tests and warnings.
    pub fn plain_text(&self) -> String {
        match self {
            DocumentElement::Heading { text, .. }
            | DocumentElement::CodeBlock { text }
            | DocumentElement::Title { text } => text.clone(),
            DocumentElement::Paragraph { spans } | DocumentElement::Blockquote { spans } => {
                spans.iter().map(InlineSpan::text).collect()
            }
            DocumentElement::List { items } => items
                .iter()
                .map(|i| i.spans.iter().map(InlineSpan::text).collect::<String>())
                .collect::<Vec<_>>()
                .join("\n"),
            DocumentElement::Table { header, rows } => {
                let mut out = header.join(" | ");
                for row in rows {
                    out.push('\n');
                    out.push_str(&row.join(" | "));
                }
                out
            }
            DocumentElement::ImageReference { alt, .. } => alt.clone(),
            DocumentElement::Toc | DocumentElement::PageBreak => String::new(),
        }
    }
}
