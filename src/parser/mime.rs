//! MIME message decoding: body selection, attachment enumeration, HTML-to-text.

use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

use super::charset;
use super::header::{decode_header_value, header_param, sent_at_from_header, unfold};
use crate::error::{HarvestError, Result};
use crate::model::address::EmailAddress;
use crate::model::message::{
    has_spreadsheet_extension, is_garbled_filename, is_spreadsheet_mime, AttachmentBlob,
    RawMessage,
};

/// Maximum depth for recursive multipart descent (adversarial input guard).
const MAX_MIME_DEPTH: usize = 32;

/// Decode a complete raw message (headers + body) into a [`RawMessage`].
///
/// Charset problems never fail the decode; only a structurally unparseable
/// message returns an error.
pub fn decode_message(id: &str, raw: &[u8]) -> Result<RawMessage> {
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| HarvestError::Mime(format!("message {id}: {e}")))?;

    let subject = raw_header(&parsed, "Subject")
        .map(decode_header_value)
        .unwrap_or_default();
    let sender = raw_header(&parsed, "From")
        .map(|raw| EmailAddress::parse(&unfold(&charset::decode_bytes(raw, None))))
        .unwrap_or_default();
    let sent_at = raw_header(&parsed, "Date")
        .map(|raw| sent_at_from_header(&decode_header_value(raw)))
        .unwrap_or_default();

    let mut walk = PartWalk::default();
    walk.visit(&parsed, 0);

    let body = match (walk.plain, walk.html) {
        (Some(plain), _) => plain,
        (None, Some(html)) => html_to_text(&html),
        (None, None) => String::new(),
    };

    debug!(
        id,
        subject = %subject,
        attachments = walk.attachments.len(),
        "Decoded message"
    );

    Ok(RawMessage {
        id: id.to_string(),
        subject,
        sender,
        sent_at,
        body,
        attachments: walk.attachments,
    })
}

/// Raw bytes of the first header named `name`.
fn raw_header<'a>(part: &'a ParsedMail<'_>, name: &str) -> Option<&'a [u8]> {
    part.headers.get_first_header(name).map(|h| h.get_value_raw())
}

/// State accumulated over a depth-first traversal of the MIME tree.
#[derive(Default)]
struct PartWalk {
    plain: Option<String>,
    html: Option<String>,
    attachments: Vec<AttachmentBlob>,
}

impl PartWalk {
    fn visit(&mut self, part: &ParsedMail<'_>, depth: usize) {
        if depth > MAX_MIME_DEPTH {
            warn!(depth, "MIME nesting too deep, ignoring remaining parts");
            return;
        }
        if !part.subparts.is_empty() {
            for sub in &part.subparts {
                self.visit(sub, depth + 1);
            }
            return;
        }

        let filename = part_filename(part);
        let disposition = part.get_content_disposition().disposition;

        if let Some(name) = filename {
            self.collect_attachment(part, name);
        }
        if matches!(disposition, DispositionType::Attachment) {
            return;
        }

        let mime = part.ctype.mimetype.to_ascii_lowercase();
        match mime.as_str() {
            "text/plain" if self.plain.is_none() => {
                let text = part_text(part);
                if !text.trim().is_empty() {
                    self.plain = Some(text);
                }
            }
            "text/html" if self.html.is_none() => {
                let text = part_text(part);
                if !text.trim().is_empty() {
                    self.html = Some(text);
                }
            }
            _ => {}
        }
    }

    fn collect_attachment(&mut self, part: &ParsedMail<'_>, filename: String) {
        let declared = part.ctype.mimetype.to_ascii_lowercase();
        let keep = has_spreadsheet_extension(&filename)
            || (is_garbled_filename(&filename)
                && (is_spreadsheet_mime(&declared) || declared == "application/octet-stream"));
        if !keep {
            debug!(filename = %filename, mime = %declared, "Skipping non-spreadsheet attachment");
            return;
        }

        match part.get_body_raw() {
            Ok(bytes) => self
                .attachments
                .push(AttachmentBlob::new(filename, bytes, &part.ctype.mimetype)),
            Err(e) => warn!(filename = %filename, error = %e, "Cannot decode attachment payload"),
        }
    }
}

/// Transfer-decode a leaf part and decode its text with the ranked charsets.
fn part_text(part: &ParsedMail<'_>) -> String {
    let declared = part.ctype.params.get("charset").map(String::as_str);
    match part.get_body_raw() {
        Ok(bytes) => charset::decode_bytes(&bytes, declared),
        Err(e) => {
            warn!(error = %e, "Cannot transfer-decode body part");
            String::new()
        }
    }
}

/// Filename of a part: `Content-Disposition` `filename`, else
/// `Content-Type` `name`.
///
/// Parameters are read from the raw header bytes so undeclared 8-bit names go
/// through the same ranked charset list as bodies.
pub fn part_filename(part: &ParsedMail<'_>) -> Option<String> {
    let param = |header: &str, name: &str| {
        raw_header(part, header)
            .map(|raw| unfold(&charset::decode_bytes(raw, None)))
            .and_then(|value| header_param(&value, name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    param("Content-Disposition", "filename").or_else(|| param("Content-Type", "name"))
}

// ── HTML ────────────────────────────────────────────────────────

/// Convert HTML to plain text.
///
/// - Removes `<script>` and `<style>` blocks
/// - Turns `<br>`, `<p>`, `<div>`, `<tr>`, `<li>` and headings into line breaks
/// - Strips remaining tags and decodes named and numeric entities
/// - Collapses runs of blank lines into one
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    for tag in &["br", "br/", "br /"] {
        text = replace_ascii_ci(&text, &format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = replace_ascii_ci(&text, &format!("<{tag}>"), "\n");
        text = replace_ascii_ci(&text, &format!("<{tag} "), "\n<");
        text = replace_ascii_ci(&text, &format!("</{tag}>"), "\n");
    }

    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }

    let decoded = decode_entities(&stripped);

    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(decoded.len());
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Case-insensitive replacement of an ASCII pattern.
fn replace_ascii_ci(haystack: &str, pattern: &str, with: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (pos, _) in lower.match_indices(pattern) {
        out.push_str(&haystack[last..pos]);
        out.push_str(with);
        last = pos + pattern.len();
    }
    out.push_str(&haystack[last..]);
    out
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    // ASCII lowercasing keeps byte offsets aligned with the original
    while let Some(start) = remaining.to_ascii_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.to_ascii_lowercase().find(&close) {
            Some(end) => remaining = &after[end + close.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

/// Decode HTML character references.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let entity_end = tail.find(';').filter(|&end| end <= 10);
        let decoded = entity_end.and_then(|end| decode_entity(&tail[1..end]));
        match (entity_end, decoded) {
            (Some(end), Some(ch)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(|c| if c == '\u{A0}' { ' ' } else { c });
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "yen" => Some('¥'),
        "copy" => Some('©'),
        _ => None,
    }
}
