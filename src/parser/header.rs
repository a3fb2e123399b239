//! RFC 5322 header decoding: folding, encoded-words (RFC 2047), MIME
//! parameters (RFC 2045 / RFC 2231), and date parsing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use super::charset;

/// Decode a raw header value (as found on the wire) into text.
///
/// Raw 8-bit bytes are decoded with the ranked charset list, folding is
/// removed, and RFC 2047 encoded-words are resolved.
pub fn decode_header_value(raw: &[u8]) -> String {
    let text = charset::decode_bytes(raw, None);
    decode_encoded_words(&unfold(&text)).trim().to_string()
}

/// Join folded continuation lines into a single line.
pub fn unfold(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 && (line.starts_with(' ') || line.starts_with('\t')) {
            result.push(' ');
            result.push_str(line.trim_start());
        } else {
            if i > 0 {
                result.push(' ');
            }
            result.push_str(line);
        }
    }
    result
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Adjacent words in the same charset, separated only by whitespace, are
/// joined as bytes before decoding, since mailers split multibyte characters
/// across words. The charset named in the word is tried first, then the
/// fallback charsets. Tokens that are not well-formed encoded-words are kept
/// verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut pending: Option<DecodedWord> = None;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        let after_start = &remaining[start + 2..];

        let Some(word) = try_decode_one_word(after_start) else {
            flush_word(&mut result, pending.take());
            result.push_str(before);
            result.push_str("=?");
            remaining = after_start;
            continue;
        };
        remaining = &remaining[start + 2 + word.consumed..];

        // Whitespace between two adjacent encoded-words is dropped (RFC 2047 §6.2)
        let adjacent = pending.is_some() && before.trim().is_empty();
        match pending.as_mut() {
            Some(prev) if adjacent && prev.charset.eq_ignore_ascii_case(&word.charset) => {
                prev.bytes.extend_from_slice(&word.bytes);
            }
            _ => {
                flush_word(&mut result, pending.take());
                if !adjacent {
                    result.push_str(before);
                }
                pending = Some(word);
            }
        }
    }

    flush_word(&mut result, pending);
    result.push_str(remaining);
    result
}

struct DecodedWord {
    charset: String,
    bytes: Vec<u8>,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn flush_word(out: &mut String, word: Option<DecodedWord>) {
    if let Some(word) = word {
        out.push_str(&charset::decode_bytes(&word.bytes, Some(&word.charset)));
    }
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset_label = &s[..first_q];
    if charset_label.is_empty() || charset_label.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let total_consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64_lenient(encoded_text)?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 allows a language suffix: "utf-8*ja"
    let label = charset_label.split('*').next().unwrap_or(charset_label);

    Some(DecodedWord {
        charset: label.to_string(),
        bytes,
        consumed: total_consumed,
    })
}

/// Base64 decode tolerating embedded whitespace and missing padding.
fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    let mut cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }
    STANDARD.decode(cleaned.as_bytes()).ok()
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match hex_byte(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Extract a parameter from a structured header value such as
/// `Content-Disposition` or `Content-Type`.
///
/// Handles plain (`name=value`, `name="value"`), RFC 2231 extended
/// (`name*=charset'lang'%XX..`) and continued (`name*0=`, `name*1*=`) forms.
/// Encoded-words inside plain values are decoded as well, since many mailers
/// put RFC 2047 text in `filename=`.
pub fn header_param(value: &str, name: &str) -> Option<String> {
    let name = name.to_ascii_lowercase();
    let mut plain: Option<String> = None;
    let mut extended: Option<String> = None;
    // (index, is_encoded, raw)
    let mut sections: Vec<(u32, bool, String)> = Vec::new();

    for param in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = unquote(raw.trim());

        if key == name {
            plain = Some(raw);
        } else if key == format!("{name}*") {
            extended = Some(raw);
        } else if let Some(suffix) = key.strip_prefix(&format!("{name}*")) {
            let (index, encoded) = match suffix.strip_suffix('*') {
                Some(idx) => (idx, true),
                None => (suffix, false),
            };
            if let Ok(index) = index.parse::<u32>() {
                sections.push((index, encoded, raw));
            }
        }
    }

    if let Some(ext) = extended {
        return Some(decode_rfc2231(&ext));
    }

    if !sections.is_empty() {
        sections.sort_by_key(|(idx, _, _)| *idx);
        // The charset, if any, is declared on the first encoded section
        let mut declared: Option<String> = None;
        let mut bytes: Vec<u8> = Vec::new();
        for (pos, (_, encoded, raw)) in sections.iter().enumerate() {
            if *encoded {
                let mut text = raw.as_str();
                if pos == 0 {
                    if let Some((cs, rest)) = split_charset_prefix(raw) {
                        declared = Some(cs.to_string());
                        text = rest;
                    }
                }
                bytes.extend(percent_decode(text));
            } else {
                bytes.extend_from_slice(raw.as_bytes());
            }
        }
        let text = charset::decode_bytes(&bytes, declared.as_deref());
        return Some(decode_encoded_words(&text));
    }

    plain.map(|p| decode_encoded_words(&p))
}

/// Decode a single RFC 2231 extended value `charset'lang'%XX...`.
fn decode_rfc2231(raw: &str) -> String {
    let (declared, body) = match split_charset_prefix(raw) {
        Some((cs, rest)) => (Some(cs), rest),
        None => (None, raw),
    };
    charset::decode_bytes(&percent_decode(body), declared.filter(|c| !c.is_empty()))
}

/// Split `charset'lang'rest` into (`charset`, `rest`).
fn split_charset_prefix(raw: &str) -> Option<(&str, &str)> {
    let first = raw.find('\'')?;
    let second = raw[first + 1..].find('\'')? + first + 1;
    Some((&raw[..first], &raw[second + 1..]))
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(b) = hex_byte(bytes[i + 1], bytes[i + 2]) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Split a structured header on `;`, respecting quoted strings.
fn split_params(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Strip surrounding double quotes and resolve backslash escapes.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let inner = &s[1..s.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        s.to_string()
    }
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Drop trailing comments such as "(JST)"
    let no_comment = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };

    // chrono reads unknown zone names such as "JST" as -0000, so swap them
    // for numeric offsets first.
    if let Ok(dt) = DateTime::parse_from_rfc2822(&replace_named_tz(no_comment)) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(no_comment) {
        return Some(dt.with_timezone(&Utc));
    }

    // Remove leading day-of-week: "Thu, " or "Thu "
    let no_dow = strip_day_of_week(no_comment);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];

    for candidate in [no_dow.clone(), replace_named_tz(&no_dow)] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Format a `Date:` header as the UTC RFC 3339 string stored in records.
///
/// Returns an empty string when the date cannot be parsed.
pub fn sent_at_from_header(date_str: &str) -> String {
    parse_date(date_str)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    // Wrap input in a minimal RFC 5322 message so mail-parser can parse it
    let fake_msg = format!("Date: {input}\n\n");
    let parser = MessageParser::default();
    let parsed = parser.parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    let days = [
        "Mon,", "Tue,", "Wed,", "Thu,", "Fri,", "Sat,", "Sun,", "Mon ", "Tue ", "Wed ", "Thu ",
        "Fri ", "Sat ", "Sun ",
    ];
    for day in &days {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 16] = [
        ("JST", "+0900"),
        ("KST", "+0900"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("BST", "+0100"),
        ("CET", "+0100"),
        ("CEST", "+0200"),
    ];
    let trimmed = s.trim();
    // Only the whole last token names a zone; "CEST" must not match "EST"
    let Some((head, last)) = trimmed.rsplit_once(char::is_whitespace) else {
        return trimmed.to_string();
    };
    match ZONES.iter().find(|(name, _)| last.eq_ignore_ascii_case(name)) {
        Some((_, offset)) => format!("{} {offset}", head.trim_end()),
        None => trimmed.to_string(),
    }
}
