//! DOCX to HTML conversion.
//!
//! A DOCX file is a zip archive whose main body lives in
//! `word/document.xml`. Only the structure the mapping stage consumes is
//! converted: paragraph styles `Heading1` through `Heading6` become
//! `h1`–`h6`, plain paragraphs become `p`, and `w:tbl`/`w:tr`/`w:tc`
//! become `table`/`tr`/`td`. Everything else (runs, formatting,
//! drawings) contributes only its text.

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;

/// Convert DOCX bytes to an HTML document body.
pub fn docx_to_html(bytes: &[u8]) -> Result<String> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor).context("Failed to open DOCX archive")?;
    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("DOCX archive has no word/document.xml")?
        .read_to_string(&mut document_xml)
        .context("Failed to read word/document.xml")?;
    body_xml_to_html(&document_xml)
}

fn body_xml_to_html(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut html = String::from("<html><body>");
    let mut paragraph_text = String::new();
    let mut in_paragraph = false;
    let mut pending_style: Option<String> = None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => {
                    in_paragraph = true;
                    paragraph_text.clear();
                    pending_style = None;
                }
                b"w:tbl" => html.push_str("<table>"),
                b"w:tr" => html.push_str("<tr>"),
                b"w:tc" => html.push_str("<td>"),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"w:pStyle" {
                    if let Some(attr) = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"w:val")
                    {
                        pending_style =
                            Some(String::from_utf8_lossy(&attr.value).into_owned());
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if in_paragraph {
                    paragraph_text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:p" => {
                    in_paragraph = false;
                    let text = paragraph_text.trim();
                    if !text.is_empty() {
                        let tag = heading_tag(pending_style.as_deref());
                        html.push_str(&format!("<{tag}>{}</{tag}>", escape(text)));
                    }
                }
                b"w:tbl" => html.push_str("</table>"),
                b"w:tr" => html.push_str("</tr>"),
                b"w:tc" => html.push_str("</td>"),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => anyhow::bail!("Malformed document.xml: {e}"),
            _ => {}
        }
        buf.clear();
    }

    html.push_str("</body></html>");
    Ok(html)
}

/// Map a Word paragraph style to the HTML tag the mapper understands.
/// `Heading1` is the document title; deeper headings all become section
/// headings.
fn heading_tag(style: Option<&str>) -> &'static str {
    match style {
        Some("Heading1") | Some("Title") => "h1",
        Some("Heading2") => "h2",
        Some("Heading3") => "h3",
        Some("Heading4") => "h4",
        Some("Heading5") => "h5",
        Some("Heading6") => "h6",
        _ => "p",
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
