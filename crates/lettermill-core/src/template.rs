//! Template scanning and letter rendering.
//!
//! Templates are plain text with `{Token}` placeholder slots and an optional
//! `[signature]` anchor line. Rendering fills slots by tag-keyed lookup
//! (exact, then case-insensitive) against the resolved token map; unmatched
//! slots are left as-is and logged as diagnostics, never failures. The
//! signature anchor is replaced by the cleaned signature image; with no
//! anchor the signature is silently dropped, and with no signature the
//! anchor line is dropped. Output serializes to HTML bytes; the paged
//! preview is a pure function of those bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resolve::TokenMap;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"\{([A-Za-z0-9][A-Za-z0-9 _.\-]*)\}").unwrap();
}

/// The line that marks where the signature image is inserted.
pub const SIGNATURE_ANCHOR: &str = "[signature]";

/// Scan a template body for `{Token}` placeholders, unique, in order of
/// first appearance.
pub fn scan_tokens(body: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in TOKEN_RE.captures_iter(body) {
        let token = cap[1].to_string();
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen
}

/// One rendered block of a letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Paragraph { text: String },
    /// Base64-encoded PNG bytes of the cleaned signature.
    Image { png_base64: String },
    Break,
}

/// A rendered letter, ready to serialize for attachment or preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub blocks: Vec<Block>,
}

impl RenderedDocument {
    /// Serialize to a self-contained HTML document.
    pub fn to_html(&self) -> String {
        let mut out = String::from(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n\
             <body style=\"font-family: Georgia, serif; max-width: 650px; \
             margin: 0 auto; padding: 24px; line-height: 1.5;\">\n",
        );
        for block in &self.blocks {
            match block {
                Block::Paragraph { text } => {
                    out.push_str("<p>");
                    out.push_str(&escape_html(text));
                    out.push_str("</p>\n");
                }
                Block::Image { png_base64 } => {
                    out.push_str(&format!(
                        "<img src=\"data:image/png;base64,{png_base64}\" \
                         alt=\"signature\" style=\"max-height: 80px;\">\n"
                    ));
                }
                Block::Break => out.push_str("<br>\n"),
            }
        }
        out.push_str("</body>\n</html>\n");
        out
    }

    /// Rendered document as bytes (HTML).
    pub fn into_bytes(self) -> Vec<u8> {
        self.to_html().into_bytes()
    }
}

/// Fill a slot value: exact token lookup, then case-insensitive; misses keep
/// the literal slot text.
fn fill_line(line: &str, tokens: &TokenMap) -> String {
    TOKEN_RE
        .replace_all(line, |cap: &regex::Captures<'_>| {
            let token = &cap[1];
            match tokens.get(token) {
                Some(value) => value.to_string(),
                None => {
                    debug!(token, "unmatched template slot left as-is");
                    cap[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Render a template body against a token map, inserting the cleaned
/// signature at its anchor when both exist.
pub fn render(body: &str, tokens: &TokenMap, signature_png: Option<&[u8]>) -> RenderedDocument {
    let mut blocks = Vec::new();

    for line in body.lines() {
        if line.trim() == SIGNATURE_ANCHOR {
            // Anchor without bytes renders nothing; bytes without an anchor
            // are dropped by never reaching this arm.
            if let Some(png) = signature_png {
                blocks.push(Block::Image {
                    png_base64: BASE64.encode(png),
                });
            }
            continue;
        }
        if line.is_empty() {
            blocks.push(Block::Break);
            continue;
        }
        blocks.push(Block::Paragraph {
            text: fill_line(line, tokens),
        });
    }

    RenderedDocument { blocks }
}

/// Derive a fixed page-layout preview from rendered bytes.
///
/// Pure function of its input: the rendered representation is never mutated,
/// only wrapped with print-page styling.
pub fn derive_preview(rendered: &[u8]) -> Vec<u8> {
    let body = String::from_utf8_lossy(rendered);
    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\">\n\
         <style>@page { size: letter; margin: 25mm; }\n\
         .page { width: 170mm; min-height: 247mm; margin: 0 auto; \
         background: white; box-shadow: 0 0 4px rgba(0,0,0,0.3); }</style>\n\
         </head>\n<body>\n<div class=\"page\">\n",
    );
    out.push_str(&body);
    out.push_str("</div>\n</body>\n</html>\n");
    out.into_bytes()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(pairs: &[(&str, &str)]) -> TokenMap {
        let mut map = TokenMap::new();
        for (k, v) in pairs {
            map.insert(k, v.to_string());
        }
        map
    }

    #[test]
    fn scan_finds_unique_tokens_in_order() {
        let body = "Dear {EmpName},\nYour id is {EmpID}. Again: {EmpName}.\n{Salary}";
        assert_eq!(scan_tokens(body), vec!["EmpName", "EmpID", "Salary"]);
    }

    #[test]
    fn scan_allows_spaces_and_punctuation_in_tokens() {
        assert_eq!(scan_tokens("{EMP ID} {Date-of_joining}"), vec![
            "EMP ID",
            "Date-of_joining"
        ]);
    }

    #[test]
    fn render_fills_slots() {
        let map = tokens(&[("EmpName", "Jane Doe"), ("EmpID", "E100")]);
        let doc = render("Dear {EmpName}, id {EmpID}.", &map, None);
        assert_eq!(doc.blocks, vec![Block::Paragraph {
            text: "Dear Jane Doe, id E100.".into()
        }]);
    }

    #[test]
    fn render_lookup_is_case_insensitive() {
        let map = tokens(&[("EmpName", "Jane Doe")]);
        let doc = render("Dear {empname}.", &map, None);
        assert_eq!(doc.blocks, vec![Block::Paragraph {
            text: "Dear Jane Doe.".into()
        }]);
    }

    #[test]
    fn unmatched_slot_left_as_is() {
        let map = tokens(&[]);
        let doc = render("Ref: {UnknownToken}", &map, None);
        assert_eq!(doc.blocks, vec![Block::Paragraph {
            text: "Ref: {UnknownToken}".into()
        }]);
    }

    #[test]
    fn signature_inserted_at_anchor() {
        let map = tokens(&[]);
        let png = [0x89, b'P', b'N', b'G'];
        let doc = render("Regards,\n[signature]\nHR", &map, Some(&png));
        assert_eq!(doc.blocks.len(), 3);
        assert!(matches!(doc.blocks[1], Block::Image { .. }));
    }

    #[test]
    fn anchor_dropped_without_signature() {
        let map = tokens(&[]);
        let doc = render("Regards,\n[signature]\nHR", &map, None);
        assert_eq!(doc.blocks, vec![
            Block::Paragraph {
                text: "Regards,".into()
            },
            Block::Paragraph { text: "HR".into() },
        ]);
    }

    #[test]
    fn signature_silently_dropped_without_anchor() {
        let map = tokens(&[]);
        let png = [1u8, 2, 3];
        let doc = render("No anchor here.", &map, Some(&png));
        assert!(doc.blocks.iter().all(|b| !matches!(b, Block::Image { .. })));
    }

    #[test]
    fn html_output_escapes_text() {
        let map = tokens(&[("Note", "<b>&</b>")]);
        let doc = render("{Note}", &map, None);
        let html = doc.to_html();
        assert!(html.contains("&lt;b&gt;&amp;&lt;/b&gt;"));
    }

    #[test]
    fn preview_is_pure_and_wraps_input() {
        let rendered = b"<p>hello</p>".to_vec();
        let before = rendered.clone();
        let preview = derive_preview(&rendered);

        assert_eq!(rendered, before);
        let preview_text = String::from_utf8(preview.clone()).unwrap();
        assert!(preview_text.contains("<p>hello</p>"));
        assert!(preview_text.contains("@page"));
        // Deriving twice from the same input is identical.
        assert_eq!(preview, derive_preview(&before));
    }

    #[test]
    fn empty_lines_become_breaks() {
        let map = tokens(&[]);
        let doc = render("a\n\nb", &map, None);
        assert_eq!(doc.blocks, vec![
            Block::Paragraph { text: "a".into() },
            Block::Break,
            Block::Paragraph { text: "b".into() },
        ]);
    }
}
