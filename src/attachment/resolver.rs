//! Per-message attachment handling: rename, upload, extract skills.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use super::filename::recovered_name;
use super::spreadsheet::sheet_text;
use super::storage::{upload_attachment, BlobStore};
use crate::classify::Classifier;
use crate::model::classification::Classification;
use crate::model::message::AttachmentBlob;

/// What a message's attachments contribute to its record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAttachments {
    /// Public URLs of uploaded attachments, in attachment order.
    pub urls: Vec<String>,
    /// Skills read from engineer skill sheets, first occurrence kept.
    pub excel_skills: Vec<String>,
}

/// Uploads attachments and, for engineer postings, mines their skills.
pub struct AttachmentResolver<'a> {
    store: &'a dyn BlobStore,
    key_prefix: String,
}

impl<'a> AttachmentResolver<'a> {
    pub fn new(store: &'a dyn BlobStore, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Resolve every attachment of a classified message.
    ///
    /// `now` is local wall-clock time; it stamps temporary names and picks
    /// the dated key namespace. Each attachment fails independently.
    pub fn resolve(
        &self,
        attachments: &[AttachmentBlob],
        classification: &Classification,
        classifier: &Classifier<'_>,
        now: NaiveDateTime,
    ) -> ResolvedAttachments {
        let mut resolved = ResolvedAttachments::default();
        let is_engineer = classification.as_engineer().is_some();

        for blob in attachments {
            let filename = if blob.is_garbled {
                let name = recovered_name(Some(classification), &blob.filename, &blob.mime_type, now);
                debug!(original = %blob.filename, recovered = %name, "Renamed garbled attachment");
                name
            } else {
                blob.filename.clone()
            };

            if let Some(url) = upload_attachment(
                self.store,
                &self.key_prefix,
                now.date(),
                &filename,
                &blob.bytes,
                &blob.mime_type,
            ) {
                resolved.urls.push(url);
            }

            if is_engineer {
                for skill in self.skills_from(blob, &filename, classifier) {
                    if !resolved.excel_skills.contains(&skill) {
                        resolved.excel_skills.push(skill);
                    }
                }
            }
        }
        resolved
    }

    fn skills_from(
        &self,
        blob: &AttachmentBlob,
        filename: &str,
        classifier: &Classifier<'_>,
    ) -> Vec<String> {
        let text = match sheet_text(&blob.bytes) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(filename, "Spreadsheet is empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(filename, error = %e, "Cannot read spreadsheet");
                return Vec::new();
            }
        };
        classifier
            .extract_skills(&text)
            .map(|sheet| sheet.excel_skills)
            .unwrap_or_default()
    }
}
