//! Pipeline driver: fetch, fingerprint, dedup, classify, resolve, write.
//!
//! Messages are processed one at a time. Every failure after the fetch is
//! local to its message; the driver always moves on to the next one and
//! tallies the terminal state in a [`RunSummary`].

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::attachment::AttachmentResolver;
use crate::classify::Classifier;
use crate::fingerprint::Fingerprint;
use crate::mailbox::{fetch_recent, Mailbox};
use crate::model::classification::Classification;
use crate::model::message::RawMessage;
use crate::model::record::{build_record, RecordContext, TableKind};
use crate::warehouse::{already_ingested, write_record, Warehouse};

/// Terminal state of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The fingerprint is already stored; no inference was spent.
    SkippedDuplicate,
    /// Classified as neither project nor engineer.
    SkippedOther,
    /// Every model failed.
    ClassifyFailed,
    /// The warehouse rejected the row.
    WriteFailed(TableKind),
    /// One row inserted.
    Written(TableKind),
}

/// Per-state counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub engineer: usize,
    pub project: usize,
    pub duplicate_skipped: usize,
    pub other_skipped: usize,
    pub classify_failed: usize,
    pub write_failed: usize,
    /// Set when the mailbox could not be read at all.
    pub fetch_error: Option<String>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::SkippedDuplicate => self.duplicate_skipped += 1,
            Outcome::SkippedOther => self.other_skipped += 1,
            Outcome::ClassifyFailed => self.classify_failed += 1,
            Outcome::WriteFailed(_) => self.write_failed += 1,
            Outcome::Written(TableKind::Engineer) => self.engineer += 1,
            Outcome::Written(TableKind::Project) => self.project += 1,
        }
    }

    /// Rows inserted in this run.
    pub fn written(&self) -> usize {
        self.engineer + self.project
    }
}

/// Progress callback: `(done, total)`.
pub type ProgressFn<'p> = &'p dyn Fn(usize, usize);

/// Wires the collaborators together for a run.
pub struct Pipeline<'a> {
    mailbox: &'a dyn Mailbox,
    warehouse: &'a dyn Warehouse,
    classifier: Classifier<'a>,
    resolver: AttachmentResolver<'a>,
    fetch_limit: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        mailbox: &'a dyn Mailbox,
        warehouse: &'a dyn Warehouse,
        classifier: Classifier<'a>,
        resolver: AttachmentResolver<'a>,
        fetch_limit: usize,
    ) -> Self {
        Self {
            mailbox,
            warehouse,
            classifier,
            resolver,
            fetch_limit,
        }
    }

    /// Fetch and process one batch.
    ///
    /// A transport failure during fetch is logged, stored in
    /// [`RunSummary::fetch_error`], and ends the run with nothing processed.
    pub fn run(&self, progress: Option<ProgressFn<'_>>) -> RunSummary {
        let mut summary = RunSummary::default();

        let messages = match fetch_recent(self.mailbox, self.fetch_limit) {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Mailbox fetch failed");
                summary.fetch_error = Some(e.to_string());
                return summary;
            }
        };

        let total = messages.len();
        if let Some(cb) = progress {
            cb(0, total);
        }
        for (i, msg) in messages.iter().enumerate() {
            let outcome = self.process_message(msg, Utc::now());
            debug!(id = %msg.id, ?outcome, "Message finished");
            summary.record(outcome);
            if let Some(cb) = progress {
                cb(i + 1, total);
            }
        }

        info!(
            processed = summary.processed,
            engineer = summary.engineer,
            project = summary.project,
            duplicates = summary.duplicate_skipped,
            other = summary.other_skipped,
            "Run complete"
        );
        summary
    }

    /// Drive one message to a terminal state. `now` stamps `extracted_at`
    /// and, converted to local time, attachment keys and temporary names.
    pub fn process_message(&self, msg: &RawMessage, now: DateTime<Utc>) -> Outcome {
        let fp = Fingerprint::of_message(msg);
        debug!(id = %msg.id, fingerprint = %fp, "Fingerprinted");

        if already_ingested(self.warehouse, &fp) {
            info!(id = %msg.id, subject = %msg.subject, "Skipping already ingested message");
            return Outcome::SkippedDuplicate;
        }

        let Some(classification) = self.classifier.classify(&msg.body, &msg.subject) else {
            return Outcome::ClassifyFailed;
        };
        if matches!(classification, Classification::Other(_)) {
            debug!(id = %msg.id, "Not a staffing mail");
            return Outcome::SkippedOther;
        }

        let local_now = now.with_timezone(&Local).naive_local();
        let resolved = self.resolver.resolve(
            &msg.attachments,
            &classification,
            &self.classifier,
            local_now,
        );

        let ctx = RecordContext {
            fingerprint: fp.as_str(),
            sent_at: &msg.sent_at,
            subject: &msg.subject,
            file_urls: &resolved.urls,
            excel_skills: &resolved.excel_skills,
            extracted_at: now,
        };
        let Some(record) = build_record(&classification, &ctx) else {
            return Outcome::SkippedOther;
        };

        let table = record.table();
        match write_record(self.warehouse, &record) {
            Ok(()) => {
                info!(id = %msg.id, table = %table, fingerprint = record.fingerprint(), "Record written");
                Outcome::Written(table)
            }
            Err(e) => {
                warn!(id = %msg.id, table = %table, error = %e, "Insert rejected");
                Outcome::WriteFailed(table)
            }
        }
    }
}
