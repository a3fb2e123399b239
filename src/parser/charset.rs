//! Ranked character-set decoding.
//!
//! Mail from Japanese business correspondents arrives in UTF-8, ISO-2022-JP,
//! Shift_JIS (and its CP932 superset) or EUC-JP, frequently with a missing or
//! wrong `charset` label. Decoding tries the declared charset first and then a
//! fixed list of fallbacks, accepting the first strict success. If nothing
//! decodes cleanly the bytes are read as UTF-8 with invalid sequences dropped,
//! so decoding never fails.

use encoding_rs::Encoding;

/// Fallback charsets tried after the declared one, in order.
///
/// `cp932` shares an `encoding_rs` decoder with `shift_jis` and is therefore
/// skipped as a duplicate during candidate construction.
pub const FALLBACK_CHARSETS: &[&str] = &["utf-8", "iso-2022-jp", "shift_jis", "euc-jp", "cp932"];

/// One entry in the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// Strict 7-bit ASCII. `encoding_rs` maps the `us-ascii` label to
    /// windows-1252, which would accept any byte.
    Ascii,
    /// Any encoding known to `encoding_rs`.
    Encoding(&'static Encoding),
}

impl Candidate {
    /// Resolve a charset label. Returns `None` for unknown labels.
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"').to_ascii_lowercase();
        match label.as_str() {
            "" => None,
            "us-ascii" | "ascii" | "ansi_x3.4-1968" | "us" => Some(Self::Ascii),
            _ => Encoding::for_label(label.as_bytes()).map(Self::Encoding),
        }
    }

    /// Decode strictly: any malformed sequence rejects the candidate.
    pub fn decode_strict(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Ascii => bytes
                .is_ascii()
                .then(|| String::from_utf8_lossy(bytes).into_owned()),
            Self::Encoding(enc) => enc
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|cow| cow.into_owned()),
        }
    }

    /// Canonical name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ascii => "US-ASCII",
            Self::Encoding(enc) => enc.name(),
        }
    }
}

/// Build the ordered candidate list: declared charset first, then
/// [`FALLBACK_CHARSETS`], without duplicates.
pub fn candidates(declared: Option<&str>) -> Vec<Candidate> {
    let mut list: Vec<Candidate> = Vec::with_capacity(FALLBACK_CHARSETS.len() + 1);
    let declared = declared.and_then(|label| {
        let c = Candidate::for_label(label);
        if c.is_none() {
            tracing::debug!(charset = label, "Unknown declared charset");
        }
        c
    });

    for candidate in declared
        .into_iter()
        .chain(FALLBACK_CHARSETS.iter().filter_map(|l| Candidate::for_label(l)))
    {
        if !list.contains(&candidate) {
            list.push(candidate);
        }
    }
    list
}

/// ISO-2022-JP designations: JIS X 0208-1983, JIS X 0208-1978, JIS X 0201 Roman.
const ISO_2022_ESCAPES: [&[u8]; 3] = [b"\x1b$B", b"\x1b$@", b"\x1b(J"];

/// Whether `bytes` carry an ISO-2022-JP designation escape.
pub fn has_iso_2022_escape(bytes: &[u8]) -> bool {
    bytes
        .windows(3)
        .any(|w| ISO_2022_ESCAPES.iter().any(|esc| w == *esc))
}

/// Decode `bytes` into text, never failing.
///
/// Tries each candidate from [`candidates`] in order and returns the first
/// strict success. ISO-2022-JP is pure 7-bit and would pass as UTF-8, so it
/// moves to the front when the bytes contain one of its escapes. Falls back
/// to UTF-8 with invalid bytes discarded.
pub fn decode_bytes(bytes: &[u8], declared: Option<&str>) -> String {
    // Strip a UTF-8 BOM
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    let mut list = candidates(declared);
    if has_iso_2022_escape(bytes) {
        let jis = Candidate::Encoding(encoding_rs::ISO_2022_JP);
        list.retain(|c| *c != jis);
        list.insert(0, jis);
    }

    for candidate in list {
        if let Some(text) = candidate.decode_strict(bytes) {
            tracing::trace!(charset = candidate.name(), "Decoded");
            return text;
        }
    }

    tracing::debug!(len = bytes.len(), "No charset decoded cleanly, dropping invalid bytes");
    utf8_discarding_invalid(bytes)
}

/// UTF-8 decode that skips invalid sequences instead of substituting U+FFFD.
pub fn utf8_discarding_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}
