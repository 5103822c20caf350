//! Document mapping: raw layout-analysis output (or HTML) → [`DocumentMap`].
//!
//! The layout-analysis service reports paragraphs and tables as character
//! spans over one flat content string, and the spans overlap (table cell
//! text is usually also reported as paragraphs). Classification therefore
//! works over an explicit per-character tag array: tables are range-filled
//! first and take precedence, then paragraphs whose start is still
//! unclaimed are filled according to their role. Header, footer, page
//! number, and footnote spans are never tagged and so never reach a
//! [`StructureElement`].
//!
//! A single left-to-right sweep over the tag array then emits elements,
//! threading "current title" and "current section" as local accumulators.

use serde::Deserialize;
use std::collections::HashMap;

use crate::models::{DocumentMap, ElementKind, StructureElement};

/// Paragraph roles excluded from the output entirely.
const DROPPED_ROLES: &[&str] = &["pageHeader", "pageFooter", "pageNumber", "footnote"];

// ── Layout-analysis result schema ──────────────────────────────────────

/// Character span into the flat content string.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub role: Option<String>,
    pub span: Span,
    #[serde(default = "default_page", alias = "pageNumber")]
    pub page: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCell {
    pub row: usize,
    pub col: usize,
    #[serde(default = "default_span_count")]
    pub row_span: usize,
    #[serde(default = "default_span_count")]
    pub col_span: usize,
    /// `columnHeader` / `rowHeader` render as `<th>`; anything else as `<td>`.
    #[serde(default)]
    pub kind: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Table {
    pub span: Span,
    pub cells: Vec<TableCell>,
}

/// Completed result payload from the layout-analysis service.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResult {
    pub content: String,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub tables: Vec<Table>,
}

fn default_page() -> u32 {
    1
}
fn default_span_count() -> usize {
    1
}

// ── PDF variant ────────────────────────────────────────────────────────

/// Per-character classification tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    NotProcessed,
    TableStart,
    TableChar,
    TableEnd,
    TitleStart,
    TitleChar,
    TitleEnd,
    SectionStart,
    SectionChar,
    SectionEnd,
    TextStart,
    TextChar,
    TextEnd,
}

/// Fill `tags[start..=end]` with the start/interior/end triple for one span.
fn fill_span(tags: &mut [Tag], start: usize, end: usize, triple: (Tag, Tag, Tag)) {
    let (start_tag, char_tag, end_tag) = triple;
    tags[start] = start_tag;
    for i in start + 1..end {
        tags[i] = char_tag;
    }
    // A one-character span carries only the end tag; the sweep emits on it.
    tags[end] = end_tag;
}

/// Build a [`DocumentMap`] from a layout-analysis result.
pub fn build_pdf_map(result: &AnalyzeResult) -> DocumentMap {
    let chars: Vec<char> = result.content.chars().collect();
    let mut tags = vec![Tag::NotProcessed; chars.len()];

    // Tables first: they take precedence over the paragraph spans that
    // duplicate their cell text.
    let mut table_ends: HashMap<usize, usize> = HashMap::new();
    for (index, table) in result.tables.iter().enumerate() {
        let Some((start, end)) = clamp_span(&table.span, chars.len()) else {
            continue;
        };
        fill_span(&mut tags, start, end, (Tag::TableStart, Tag::TableChar, Tag::TableEnd));
        table_ends.insert(end, index);
    }

    for paragraph in &result.paragraphs {
        let Some((start, end)) = clamp_span(&paragraph.span, chars.len()) else {
            continue;
        };
        if tags[start] != Tag::NotProcessed {
            continue;
        }
        let triple = match paragraph.role.as_deref() {
            Some("title") => (Tag::TitleStart, Tag::TitleChar, Tag::TitleEnd),
            Some("sectionHeading") => (Tag::SectionStart, Tag::SectionChar, Tag::SectionEnd),
            Some(role) if DROPPED_ROLES.contains(&role) => continue,
            // No role (or an unrecognized one) is plain body text.
            _ => (Tag::TextStart, Tag::TextChar, Tag::TextEnd),
        };
        fill_span(&mut tags, start, end, triple);
    }

    let mut elements = sweep(&chars, &tags, &table_ends, result);

    // Stable by-page sort keeps original offset order within a page.
    elements.sort_by_key(|e| e.page);

    DocumentMap {
        content: result.content.clone(),
        elements,
    }
}

/// Single pass over the tag array, emitting one element per `*End` tag.
fn sweep(
    chars: &[char],
    tags: &[Tag],
    table_ends: &HashMap<usize, usize>,
    result: &AnalyzeResult,
) -> Vec<StructureElement> {
    let mut elements = Vec::new();
    let mut current_title = String::new();
    let mut current_section = String::new();
    let mut run_start: Option<usize> = None;

    for (i, tag) in tags.iter().enumerate() {
        match tag {
            Tag::TableStart | Tag::TitleStart | Tag::SectionStart | Tag::TextStart => {
                run_start = Some(i);
            }
            Tag::TableEnd | Tag::TitleEnd | Tag::SectionEnd | Tag::TextEnd => {
                let start = run_start.take().unwrap_or(i);
                let text: String = chars[start..=i].iter().collect();
                match tag {
                    Tag::TitleEnd => current_title = text.trim().to_string(),
                    Tag::SectionEnd => current_section = text.trim().to_string(),
                    Tag::TextEnd => elements.push(StructureElement {
                        text,
                        kind: ElementKind::Text,
                        title: current_title.clone(),
                        section: current_section.clone(),
                        page: page_at_offset(result, start),
                        start,
                        end: i,
                    }),
                    Tag::TableEnd => {
                        let html = table_ends
                            .get(&i)
                            .map(|&idx| table_html(&result.tables[idx]))
                            .unwrap_or_default();
                        elements.push(StructureElement {
                            text: html,
                            kind: ElementKind::Table,
                            title: current_title.clone(),
                            section: current_section.clone(),
                            page: page_at_offset(result, start),
                            start,
                            end: i,
                        });
                    }
                    _ => unreachable!(),
                }
            }
            _ => {}
        }
    }

    elements
}

/// Page number of the paragraph whose span covers the offset, else 1.
fn page_at_offset(result: &AnalyzeResult, offset: usize) -> u32 {
    for paragraph in &result.paragraphs {
        let start = paragraph.span.offset;
        let end = start + paragraph.span.length;
        if (start..end).contains(&offset) {
            return paragraph.page;
        }
    }
    1
}

fn clamp_span(span: &Span, len: usize) -> Option<(usize, usize)> {
    if span.length == 0 || span.offset >= len {
        return None;
    }
    let end = (span.offset + span.length - 1).min(len - 1);
    Some((span.offset, end))
}

// ── Table serialization ────────────────────────────────────────────────

/// Render a table as HTML: rows sorted by row then column index, `<th>` for
/// header kinds, `colSpan`/`rowSpan` preserved, cell text escaped.
pub fn table_html(table: &Table) -> String {
    let mut cells: Vec<&TableCell> = table.cells.iter().collect();
    cells.sort_by_key(|c| (c.row, c.col));

    let mut html = String::from("<table>");
    let mut current_row: Option<usize> = None;
    for cell in cells {
        if current_row != Some(cell.row) {
            if current_row.is_some() {
                html.push_str("</tr>");
            }
            html.push_str("<tr>");
            current_row = Some(cell.row);
        }

        let tag = match cell.kind.as_deref() {
            Some("columnHeader") | Some("rowHeader") => "th",
            _ => "td",
        };
        html.push('<');
        html.push_str(tag);
        if cell.col_span > 1 {
            html.push_str(&format!(" colSpan=\"{}\"", cell.col_span));
        }
        if cell.row_span > 1 {
            html.push_str(&format!(" rowSpan=\"{}\"", cell.row_span));
        }
        html.push('>');
        html.push_str(&escape_html(&cell.content));
        html.push_str(&format!("</{tag}>"));
    }
    if current_row.is_some() {
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ── HTML variant ───────────────────────────────────────────────────────

/// Build a [`DocumentMap`] from HTML markup (native HTML uploads, or DOCX
/// after conversion). `h1` sets the title, `h2`–`h6` set the section, and
/// each non-empty `p` or `table` becomes one element. HTML has no native
/// pagination, so every element is page 1.
pub fn build_html_map(html: &str) -> DocumentMap {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("h1, h2, h3, h4, h5, h6, p, table")
        .expect("static selector");

    let mut content = String::new();
    let mut elements = Vec::new();
    let mut current_title = String::new();
    let mut current_section = String::new();

    for element in document.select(&selector) {
        // Paragraphs inside tables are covered by the table element itself.
        let in_table = element
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .any(|a| a.value().name() == "table");
        let name = element.value().name();
        if in_table && name != "table" {
            continue;
        }

        let text = element.text().collect::<String>().trim().to_string();
        match name {
            "h1" => current_title = text,
            "h2" | "h3" | "h4" | "h5" | "h6" => current_section = text,
            "p" => {
                if text.is_empty() {
                    continue;
                }
                push_element(
                    &mut content,
                    &mut elements,
                    text,
                    ElementKind::Text,
                    &current_title,
                    &current_section,
                );
            }
            "table" => {
                if text.is_empty() {
                    continue;
                }
                push_element(
                    &mut content,
                    &mut elements,
                    element.html(),
                    ElementKind::Table,
                    &current_title,
                    &current_section,
                );
            }
            _ => {}
        }
    }

    DocumentMap { content, elements }
}

fn push_element(
    content: &mut String,
    elements: &mut Vec<StructureElement>,
    text: String,
    kind: ElementKind,
    title: &str,
    section: &str,
) {
    if !content.is_empty() {
        content.push('\n');
    }
    let start = content.chars().count();
    content.push_str(&text);
    let end = content.chars().count().saturating_sub(1);
    elements.push(StructureElement {
        text,
        kind,
        title: title.to_string(),
        section: section.to_string(),
        page: 1,
        start,
        end,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(offset: usize, length: usize) -> Span {
        Span { offset, length }
    }

    fn paragraph(role: Option<&str>, offset: usize, length: usize, page: u32) -> Paragraph {
        Paragraph {
            role: role.map(str::to_string),
            span: span(offset, length),
            page,
        }
    }

    /// Builds a content string from parts and paragraphs spanning each part.
    fn result_from_parts(parts: &[(Option<&str>, &str, u32)]) -> AnalyzeResult {
        let mut content = String::new();
        let mut paragraphs = Vec::new();
        for (role, text, page) in parts {
            let offset = content.chars().count();
            content.push_str(text);
            paragraphs.push(paragraph(*role, offset, text.chars().count(), *page));
        }
        AnalyzeResult {
            content,
            paragraphs,
            tables: vec![],
        }
    }

    #[test]
    fn test_titles_and_sections_thread_through_text() {
        let result = result_from_parts(&[
            (Some("title"), "Annual Report", 1),
            (Some("sectionHeading"), "Overview", 1),
            (None, "First paragraph.", 1),
            (None, "Second paragraph.", 2),
        ]);

        let map = build_pdf_map(&result);
        assert_eq!(map.elements.len(), 2);
        for element in &map.elements {
            assert_eq!(element.title, "Annual Report");
            assert_eq!(element.section, "Overview");
            assert_eq!(element.kind, ElementKind::Text);
        }
        assert_eq!(map.elements[0].page, 1);
        assert_eq!(map.elements[1].page, 2);
    }

    #[test]
    fn test_dropped_roles_wholly_absent() {
        let result = result_from_parts(&[
            (Some("pageHeader"), "CONFIDENTIAL", 1),
            (None, "Body text.", 1),
            (Some("pageFooter"), "Page 1 of 9", 1),
            (Some("pageNumber"), "1", 1),
            (Some("footnote"), "[1] citation", 1),
        ]);

        let map = build_pdf_map(&result);
        let combined: String = map.elements.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(combined, "Body text.");
        for excluded in ["CONFIDENTIAL", "Page 1 of 9", "[1] citation"] {
            assert!(!combined.contains(excluded));
        }
    }

    #[test]
    fn test_coverage_reconstructs_survivor_content() {
        // Re-concatenating the element spans in offset order reproduces
        // every character that survived classification.
        let result = result_from_parts(&[
            (None, "Alpha. ", 1),
            (Some("pageNumber"), "7", 1),
            (None, "Beta.", 1),
        ]);
        let map = build_pdf_map(&result);
        let chars: Vec<char> = result.content.chars().collect();
        let rebuilt: String = map
            .elements
            .iter()
            .map(|e| chars[e.start..=e.end].iter().collect::<String>())
            .collect();
        assert_eq!(rebuilt, "Alpha. Beta.");
    }

    #[test]
    fn test_tables_take_precedence_over_paragraphs() {
        // The cell paragraph starts inside the table span, so it must not
        // produce a second element.
        let content = "Intro. A1 B1".to_string();
        let result = AnalyzeResult {
            paragraphs: vec![
                paragraph(None, 0, 7, 1),
                paragraph(None, 7, 5, 1), // duplicates the table cells
            ],
            tables: vec![Table {
                span: span(7, 5),
                cells: vec![
                    TableCell {
                        row: 0,
                        col: 0,
                        row_span: 1,
                        col_span: 1,
                        kind: None,
                        content: "A1".to_string(),
                    },
                    TableCell {
                        row: 0,
                        col: 1,
                        row_span: 1,
                        col_span: 1,
                        kind: None,
                        content: "B1".to_string(),
                    },
                ],
            }],
            content,
        };

        let map = build_pdf_map(&result);
        assert_eq!(map.elements.len(), 2);
        assert_eq!(map.elements[0].kind, ElementKind::Text);
        assert_eq!(map.elements[1].kind, ElementKind::Table);
        assert!(map.elements[1].text.starts_with("<table>"));
    }

    #[test]
    fn test_elements_sorted_by_page_stably() {
        let result = result_from_parts(&[
            (None, "Page two text.", 2),
            (None, "Page one text.", 1),
            (None, "More page two.", 2),
        ]);
        let map = build_pdf_map(&result);
        let pages: Vec<u32> = map.elements.iter().map(|e| e.page).collect();
        assert_eq!(pages, vec![1, 2, 2]);
        // Offset order preserved within page 2.
        assert_eq!(map.elements[1].text, "Page two text.");
        assert_eq!(map.elements[2].text, "More page two.");
    }

    #[test]
    fn test_table_html_two_by_two_with_column_header() {
        let table = Table {
            span: span(0, 1),
            cells: vec![
                TableCell {
                    row: 1,
                    col: 0,
                    row_span: 1,
                    col_span: 1,
                    kind: None,
                    content: "a".to_string(),
                },
                TableCell {
                    row: 0,
                    col: 1,
                    row_span: 1,
                    col_span: 1,
                    kind: None,
                    content: "top right".to_string(),
                },
                TableCell {
                    row: 0,
                    col: 0,
                    row_span: 1,
                    col_span: 1,
                    kind: Some("columnHeader".to_string()),
                    content: "Name".to_string(),
                },
                TableCell {
                    row: 1,
                    col: 1,
                    row_span: 1,
                    col_span: 1,
                    kind: None,
                    content: "b".to_string(),
                },
            ],
        };

        let html = table_html(&table);
        assert_eq!(html.matches("<table>").count(), 1);
        assert_eq!(html.matches("<tr>").count(), 2);
        assert_eq!(html.matches("<th>").count(), 1);
        assert_eq!(html.matches("<td>").count(), 3);
        // Row 0 sorted before row 1, header first within its row.
        assert!(html.find("Name").unwrap() < html.find("top right").unwrap());
        assert!(html.find("top right").unwrap() < html.find("a").unwrap());
    }

    #[test]
    fn test_table_html_spans_and_escaping() {
        let table = Table {
            span: span(0, 1),
            cells: vec![TableCell {
                row: 0,
                col: 0,
                row_span: 2,
                col_span: 3,
                kind: None,
                content: "a < b & c".to_string(),
            }],
        };
        let html = table_html(&table);
        assert!(html.contains("colSpan=\"3\""));
        assert!(html.contains("rowSpan=\"2\""));
        assert!(html.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn test_html_map_headings_and_paragraphs() {
        let html = r#"
            <html><body>
            <h1>User Guide</h1>
            <h2>Installation</h2>
            <p>Download the installer.</p>
            <p></p>
            <h3>Linux</h3>
            <p>Use the tarball.</p>
            <table><tr><td>pkg</td><td>ver</td></tr></table>
            </body></html>
        "#;
        let map = build_html_map(html);
        assert_eq!(map.elements.len(), 3);

        assert_eq!(map.elements[0].text, "Download the installer.");
        assert_eq!(map.elements[0].title, "User Guide");
        assert_eq!(map.elements[0].section, "Installation");

        assert_eq!(map.elements[1].section, "Linux");

        assert_eq!(map.elements[2].kind, ElementKind::Table);
        assert!(map.elements[2].text.contains("<table>"));

        assert!(map.elements.iter().all(|e| e.page == 1));
    }

    #[test]
    fn test_html_map_skips_paragraphs_inside_tables() {
        let html = "<table><tr><td><p>cell text</p></td></tr></table>";
        let map = build_html_map(html);
        assert_eq!(map.elements.len(), 1);
        assert_eq!(map.elements[0].kind, ElementKind::Table);
    }
}
