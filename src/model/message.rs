//! Fetched messages and their spreadsheet attachments.

use serde::Serialize;

use super::address::EmailAddress;

/// More than this many U+FFFD characters in a decoded filename marks it as
/// corrupted.
pub const GARBLED_THRESHOLD: usize = 3;

/// Spreadsheet extensions retained by the fetcher.
pub const SPREADSHEET_EXTENSIONS: &[&str] = &[".xlsx", ".xlsm", ".xls"];

pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_XLSM: &str = "application/vnd.ms-excel.sheet.macroEnabled.12";
pub const MIME_XLS: &str = "application/vnd.ms-excel";

/// One fetched email, decoded to text.
///
/// Built once per run by the fetcher and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RawMessage {
    /// Transport-assigned id. Not stable across mailbox re-indexing, so it is
    /// never used for deduplication.
    pub id: String,
    /// Decoded subject line.
    pub subject: String,
    /// Sender display name and address.
    pub sender: EmailAddress,
    /// `Date:` header in UTC RFC 3339, or empty if unparseable.
    pub sent_at: String,
    /// Best-effort plain-text body.
    pub body: String,
    /// Spreadsheet attachments in MIME order.
    pub attachments: Vec<AttachmentBlob>,
}

impl RawMessage {
    pub fn sender_name(&self) -> &str {
        &self.sender.display_name
    }

    pub fn sender_email(&self) -> &str {
        &self.sender.address
    }
}

/// A spreadsheet attachment payload.
#[derive(Clone, Serialize)]
pub struct AttachmentBlob {
    /// Decoded filename, possibly still corrupted.
    pub filename: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub size: u64,
    pub mime_type: String,
    /// Set when the filename decode produced too many replacement characters.
    pub is_garbled: bool,
}

impl std::fmt::Debug for AttachmentBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentBlob")
            .field("filename", &self.filename)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("is_garbled", &self.is_garbled)
            .finish()
    }
}

impl AttachmentBlob {
    /// Build a blob, deriving `size`, `is_garbled`, and a spreadsheet MIME
    /// type when the declared one is missing or generic.
    pub fn new(filename: String, bytes: Vec<u8>, declared_mime: &str) -> Self {
        let is_garbled = is_garbled_filename(&filename);
        let mime_type = repair_mime_type(&filename, declared_mime);
        Self {
            size: bytes.len() as u64,
            filename,
            bytes,
            mime_type,
            is_garbled,
        }
    }
}

/// Whether a decoded filename should be treated as mojibake.
pub fn is_garbled_filename(name: &str) -> bool {
    name.chars().filter(|&c| c == '\u{FFFD}').count() > GARBLED_THRESHOLD
}

/// Whether `name` ends with a spreadsheet extension (case-insensitive).
pub fn has_spreadsheet_extension(name: &str) -> bool {
    spreadsheet_extension(name).is_some()
}

/// The spreadsheet extension of `name`, lowercased, if any.
pub fn spreadsheet_extension(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    SPREADSHEET_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| lower.ends_with(ext))
}

/// Whether a declared MIME type names a spreadsheet format.
pub fn is_spreadsheet_mime(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    lower.contains("sheet") || lower.contains("excel")
}

/// Replace a missing or `application/octet-stream` type with the one the
/// filename's extension implies.
fn repair_mime_type(filename: &str, declared: &str) -> String {
    let declared = declared.trim();
    if !declared.is_empty() && !declared.eq_ignore_ascii_case("application/octet-stream") {
        return declared.to_string();
    }
    match spreadsheet_extension(filename) {
        Some(".xlsx") => MIME_XLSX.to_string(),
        Some(".xlsm") => MIME_XLSM.to_string(),
        Some(".xls") => MIME_XLS.to_string(),
        _ if declared.is_empty() => "application/octet-stream".to_string(),
        _ => declared.to_string(),
    }
}
