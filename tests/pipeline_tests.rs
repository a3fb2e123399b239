//! End-to-end pipeline tests against in-memory collaborators.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use mailharvest::attachment::{AttachmentResolver, BlobStore};
use mailharvest::classify::{Classifier, GenerationSettings, InferenceService, Sleep};
use mailharvest::config::InferenceConfig;
use mailharvest::error::{HarvestError, InferenceError, Result};
use mailharvest::fingerprint::Fingerprint;
use mailharvest::mailbox::{Mailbox, MailboxSession};
use mailharvest::model::record::TableKind;
use mailharvest::parser::mime::decode_message;
use mailharvest::pipeline::{Pipeline, RunSummary};
use mailharvest::warehouse::Warehouse;

// ─── Fakes ──────────────────────────────────────────────────────────

struct FakeMailbox {
    messages: Vec<Vec<u8>>,
    unreachable: bool,
    /// Ids whose fetch fails with a protocol error.
    broken: Vec<u32>,
}

struct FakeSession {
    messages: Vec<Vec<u8>>,
    broken: Vec<u32>,
}

impl Mailbox for FakeMailbox {
    fn open(&self) -> Result<Box<dyn MailboxSession>> {
        if self.unreachable {
            return Err(HarvestError::Mailbox("connection refused".into()));
        }
        Ok(Box::new(FakeSession {
            messages: self.messages.clone(),
            broken: self.broken.clone(),
        }))
    }
}

impl MailboxSession for FakeSession {
    fn search_all(&mut self) -> Result<Vec<u32>> {
        Ok((1..=self.messages.len() as u32).collect())
    }

    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>> {
        if self.broken.contains(&id) {
            return Err(HarvestError::Mailbox(format!("FETCH {id} failed: BAD")));
        }
        Ok(self.messages[id as usize - 1].clone())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeWarehouse {
    rows: RefCell<Vec<(TableKind, Value)>>,
    queries_fail: bool,
    inserts_fail: bool,
}

impl FakeWarehouse {
    fn rows_in(&self, table: TableKind) -> Vec<Value> {
        self.rows
            .borrow()
            .iter()
            .filter(|(t, _)| *t == table)
            .map(|(_, row)| row.clone())
            .collect()
    }
}

impl Warehouse for FakeWarehouse {
    fn exists(&self, table: TableKind, fingerprint: &str) -> Result<bool> {
        if self.queries_fail {
            return Err(HarvestError::Warehouse("Not found: Table EngineerData".into()));
        }
        Ok(self
            .rows
            .borrow()
            .iter()
            .any(|(t, row)| *t == table && row["fingerprint"] == fingerprint))
    }

    fn insert_row(&self, table: TableKind, row: &Value) -> Result<()> {
        if self.inserts_fail {
            return Err(HarvestError::Warehouse("no such field".into()));
        }
        self.rows.borrow_mut().push((table, row.clone()));
        Ok(())
    }
}

/// Answers classification prompts by looking for a subject marker.
struct FakeModel {
    answers: Vec<(&'static str, &'static str)>,
    rate_limited: bool,
    calls: Cell<usize>,
}

impl FakeModel {
    fn new(answers: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            answers,
            rate_limited: false,
            calls: Cell::new(0),
        }
    }
}

impl InferenceService for FakeModel {
    fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _settings: &GenerationSettings,
    ) -> std::result::Result<String, InferenceError> {
        self.calls.set(self.calls.get() + 1);
        if self.rate_limited {
            return Err(InferenceError::RateLimited("RESOURCE_EXHAUSTED".into()));
        }
        self.answers
            .iter()
            .find(|(marker, _)| prompt.contains(marker))
            .map(|(_, answer)| answer.to_string())
            .ok_or_else(|| InferenceError::Invalid("no scripted answer".into()))
    }
}

#[derive(Default)]
struct FakeStore {
    keys: RefCell<Vec<String>>,
}

impl BlobStore for FakeStore {
    fn upload(&self, key: &str, _bytes: &[u8], _content_type: &str) -> Result<()> {
        self.keys.borrow_mut().push(key.to_string());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://storage.googleapis.com/test-bucket/{key}")
    }
}

#[derive(Default)]
struct Sleeps(RefCell<Vec<Duration>>);

impl Sleep for &Sleeps {
    fn sleep(&self, duration: Duration) {
        self.0.borrow_mut().push(duration);
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

const PROJECT_SUBJECT: &str = "急募：Java案件";
const ENGINEER_SUBJECT: &str = "技術者のご紹介（A.K）";
const OTHER_SUBJECT: &str = "社内勉強会のお知らせ";

const PROJECT_JSON: &str = r#"{"type":"project","location":"Tokyo","period":"8月～","price":"80","requiredSkills":"Java","senderName":"佐藤","senderCompany":"ABC株式会社"}"#;
const ENGINEER_JSON: &str = r#"{"type":"engineer","engineerName":"A.K","mainSkills":"Java, AWS","yearsOfExperience":"7","monthlyRate":"75","availableFrom":"即日","gender":"男性","age":"32","nearestStation":"Shinjuku","senderName":"鈴木","senderCompany":"XYZ株式会社"}"#;
const OTHER_JSON: &str = r#"[{"type":"other","senderName":"総務","senderCompany":"社内"}]"#;
const SHEET_A_JSON: &str = r#"{"excel_skills":["Java","AWS"],"additional_info":{"certifications":["AWS SAA"]}}"#;
const SHEET_B_JSON: &str = r#"```json
{"excel_skills":["AWS","Python"]}
```"#;

fn answers() -> Vec<(&'static str, &'static str)> {
    vec![
        (PROJECT_SUBJECT, PROJECT_JSON),
        (ENGINEER_SUBJECT, ENGINEER_JSON),
        (OTHER_SUBJECT, OTHER_JSON),
        ("スキルシートA", SHEET_A_JSON),
        ("スキルシートB", SHEET_B_JSON),
    ]
}

fn plain_mail(subject: &str, body: &str, date: &str) -> Vec<u8> {
    format!(
        "From: Sales <sales@agent.example.jp>\r\n\
         Subject: =?UTF-8?B?{}?=\r\n\
         Date: {date}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {}\r\n",
        STANDARD.encode(subject),
        STANDARD.encode(body)
    )
    .into_bytes()
}

fn mail_with_attachment(subject: &str, filename: &str, content_type: &str) -> Vec<u8> {
    format!(
        "From: Sales <sales@agent.example.jp>\r\n\
         Subject: =?UTF-8?B?{}?=\r\n\
         Date: Wed, 3 Jul 2024 11:00:00 +0900\r\n\
         Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
         \r\n\
         --b1\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         スキルシートを添付します。\r\n\
         --b1\r\n\
         Content-Type: {content_type}\r\n\
         Content-Disposition: attachment; filename=\"{filename}\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {}\r\n\
         --b1--\r\n",
        STANDARD.encode(subject),
        STANDARD.encode(b"not really a workbook")
    )
    .into_bytes()
}

/// A message carrying real workbooks, each named and base64-encoded.
fn mail_with_workbooks(subject: &str, workbooks: &[(&str, &[u8])]) -> Vec<u8> {
    let mut raw = format!(
        "From: Sales <sales@agent.example.jp>\r\n\
         Subject: =?UTF-8?B?{}?=\r\n\
         Date: Thu, 4 Jul 2024 09:00:00 +0900\r\n\
         Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
         \r\n\
         --b1\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         スキルシートを2点お送りします。\r\n",
        STANDARD.encode(subject)
    );
    for (name, bytes) in workbooks {
        raw.push_str(&format!(
            "--b1\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             {}\r\n",
            STANDARD.encode(bytes)
        ));
    }
    raw.push_str("--b1--\r\n");
    raw.into_bytes()
}

fn project_mail() -> Vec<u8> {
    plain_mail(
        PROJECT_SUBJECT,
        "お世話になっております。\n下記案件のご紹介です。\n単価：80万\n場所：東京",
        "Mon, 1 Jul 2024 10:00:00 +0900",
    )
}

fn engineer_mail() -> Vec<u8> {
    plain_mail(
        ENGINEER_SUBJECT,
        "弊社技術者のご紹介です。\nA.K 32歳 男性\n稼働可：即日",
        "Mon, 1 Jul 2024 12:00:00 +0900",
    )
}

fn other_mail() -> Vec<u8> {
    plain_mail(OTHER_SUBJECT, "来週金曜に開催します。", "Tue, 2 Jul 2024 09:00:00 +0900")
}

fn config() -> InferenceConfig {
    InferenceConfig {
        models: vec!["models/test-model".into()],
        ..InferenceConfig::default()
    }
}

/// Run one pass over `mailbox` with the given collaborators.
fn run_once(
    mailbox: &FakeMailbox,
    warehouse: &FakeWarehouse,
    model: &FakeModel,
    store: &FakeStore,
    sleeps: &Sleeps,
) -> RunSummary {
    let cfg = config();
    let classifier = Classifier::new(model, &cfg).with_sleeper(sleeps);
    let resolver = AttachmentResolver::new(store, "attachments");
    let pipeline = Pipeline::new(mailbox, warehouse, classifier, resolver, 50);
    pipeline.run(None)
}

fn mailbox(messages: Vec<Vec<u8>>) -> FakeMailbox {
    FakeMailbox {
        messages,
        unreachable: false,
        broken: Vec::new(),
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[test]
fn test_project_mail_inserted() {
    let raw = project_mail();
    let mb = mailbox(vec![raw.clone()]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.project, 1);
    assert_eq!(summary.written(), 1);

    let rows = wh.rows_in(TableKind::Project);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    let msg = decode_message("1", &raw).unwrap();
    let expected = Fingerprint::compute(
        "sales@agent.example.jp",
        PROJECT_SUBJECT,
        &msg.body,
        "2024-07-01T01:00:00+00:00",
    );
    assert_eq!(row["fingerprint"], expected.as_str());
    assert_eq!(row["price"], 80);
    assert_eq!(row["location"], "Tokyo");
    assert_eq!(row["project_name"], PROJECT_SUBJECT);
    assert_eq!(row["subject"], PROJECT_SUBJECT);
    assert_eq!(row["sent_at"], "2024-07-01T01:00:00+00:00");
    assert_eq!(row["fileURL"], "");
    assert_eq!(row["sender_company"], "ABC株式会社");
    assert!(row["main_text"].as_str().unwrap().contains("単価：80万"));
    assert!(wh.rows_in(TableKind::Engineer).is_empty());
    assert!(store.keys.borrow().is_empty());
}

#[test]
fn test_duplicate_skipped_before_inference() {
    let mb = mailbox(vec![project_mail()]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    run_once(&mb, &wh, &model, &store, &sleeps);
    let calls_after_first = model.calls.get();
    assert_eq!(calls_after_first, 1);

    let second = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(second.duplicate_skipped, 1);
    assert_eq!(second.written(), 0);
    assert_eq!(model.calls.get(), calls_after_first, "classifier must not be invoked");
    assert_eq!(wh.rows.borrow().len(), 1);
}

#[test]
fn test_second_run_inserts_nothing() {
    let mb = mailbox(vec![project_mail(), engineer_mail(), other_mail()]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let first = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(first.processed, 3);
    assert_eq!(first.project, 1);
    assert_eq!(first.engineer, 1);
    assert_eq!(first.other_skipped, 1);

    let second = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(second.written(), 0);
    assert_eq!(second.duplicate_skipped, first.written());
    assert_eq!(second.other_skipped, 1);
    assert_eq!(wh.rows.borrow().len(), 2);

    let engineer = &wh.rows_in(TableKind::Engineer)[0];
    assert_eq!(engineer["monthly_rate"], 75);
    assert_eq!(engineer["years_of_experience"], 7);
    assert_eq!(engineer["age"], 32);
    assert!(engineer.get("excel_skills").is_none());
}

#[test]
fn test_rate_limited_mail_counted_and_retried_next_run() {
    let mb = mailbox(vec![project_mail()]);
    let wh = FakeWarehouse::default();
    let mut model = FakeModel::new(answers());
    model.rate_limited = true;
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.classify_failed, 1);
    assert_eq!(model.calls.get(), 3);
    let secs: Vec<u64> = sleeps.0.borrow().iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![5, 10, 20]);
    assert!(wh.rows.borrow().is_empty());

    // No fingerprint was recorded, so a later run tries again
    model.rate_limited = false;
    let again = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(again.project, 1);
}

#[test]
fn test_unreachable_mailbox_ends_run() {
    let mb = FakeMailbox {
        unreachable: true,
        ..mailbox(vec![project_mail()])
    };
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.processed, 0);
    assert!(summary.fetch_error.unwrap().contains("connection refused"));
    assert_eq!(model.calls.get(), 0);
}

#[test]
fn test_empty_mailbox_is_not_an_error() {
    let mb = mailbox(Vec::new());
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary, RunSummary::default());
    assert!(summary.fetch_error.is_none());
    assert_eq!(model.calls.get(), 0);
}

#[test]
fn test_failed_fetch_skips_only_that_message() {
    let mb = FakeMailbox {
        broken: vec![2],
        ..mailbox(vec![project_mail(), engineer_mail(), other_mail()])
    };
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert!(summary.fetch_error.is_none());
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.project, 1);
    assert_eq!(summary.other_skipped, 1);
    assert_eq!(summary.engineer, 0);
    assert!(wh.rows_in(TableKind::Engineer).is_empty());
}

#[test]
fn test_existence_errors_fail_open() {
    let mb = mailbox(vec![project_mail()]);
    let wh = FakeWarehouse {
        queries_fail: true,
        ..FakeWarehouse::default()
    };
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.project, 1);
    assert_eq!(summary.duplicate_skipped, 0);
}

#[test]
fn test_rejected_insert_counted() {
    let mb = mailbox(vec![project_mail(), engineer_mail()]);
    let wh = FakeWarehouse {
        inserts_fail: true,
        ..FakeWarehouse::default()
    };
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.write_failed, 2);
    assert_eq!(summary.written(), 0);
}

#[test]
fn test_garbled_engineer_attachment_named_from_classification() {
    let garbled = "\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}.xlsx";
    let mb = mailbox(vec![mail_with_attachment(
        ENGINEER_SUBJECT,
        garbled,
        "application/octet-stream",
    )]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.engineer, 1);

    let keys = store.keys.borrow();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("attachments/"));
    assert!(keys[0].ends_with("/A.K_Shinjuku.xlsx"), "{}", keys[0]);

    let row = &wh.rows_in(TableKind::Engineer)[0];
    let url = row["fileURL"].as_str().unwrap();
    assert_eq!(url, format!("https://storage.googleapis.com/test-bucket/{}", keys[0]));
    // The payload is not a readable workbook, so only the body classification ran
    assert_eq!(model.calls.get(), 1);
    assert!(row.get("excel_skills").is_none());
}

#[test]
fn test_garbled_project_attachment_gets_temp_name() {
    let mb = mailbox(vec![mail_with_attachment(
        PROJECT_SUBJECT,
        "\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    )]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    run_once(&mb, &wh, &model, &store, &sleeps);

    let keys = store.keys.borrow();
    assert_eq!(keys.len(), 1);
    let name = keys[0].rsplit('/').next().unwrap();
    // temp_YYYYMMDD_HHMMSS.xlsx
    let stamp = name
        .strip_prefix("temp_")
        .and_then(|s| s.strip_suffix(".xlsx"))
        .unwrap_or_else(|| panic!("unexpected name {name}"));
    let (date, time) = stamp.split_once('_').unwrap();
    assert_eq!(date.len(), 8);
    assert_eq!(time.len(), 6);
    assert!(date.chars().chain(time.chars()).all(|c| c.is_ascii_digit()));

    let segments: Vec<&str> = keys[0].split('/').collect();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1], date);
}

#[test]
fn test_progress_reports_every_message() {
    let mb = mailbox(vec![project_mail(), other_mail()]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let cfg = config();
    let classifier = Classifier::new(&model, &cfg);
    let resolver = AttachmentResolver::new(&store, "attachments");
    let pipeline = Pipeline::new(&mb, &wh, classifier, resolver, 50);

    let seen = RefCell::new(Vec::new());
    let summary = pipeline.run(Some(&|done: usize, total: usize| seen.borrow_mut().push((done, total))));
    assert_eq!(summary.processed, 2);
    assert_eq!(*seen.borrow(), vec![(0, 2), (1, 2), (2, 2)]);
}

#[test]
fn test_engineer_workbooks_contribute_deduplicated_skills() {
    let sheet_a: &[u8] = include_bytes!("fixtures/skills_a.xlsx");
    let sheet_b: &[u8] = include_bytes!("fixtures/skills_b.xlsx");
    let mb = mailbox(vec![mail_with_workbooks(
        ENGINEER_SUBJECT,
        &[("skills_a.xlsx", sheet_a), ("skills_b.xlsx", sheet_b)],
    )]);
    let wh = FakeWarehouse::default();
    let model = FakeModel::new(answers());
    let store = FakeStore::default();
    let sleeps = Sleeps::default();

    let summary = run_once(&mb, &wh, &model, &store, &sleeps);
    assert_eq!(summary.engineer, 1);
    // One classification plus one extraction per workbook
    assert_eq!(model.calls.get(), 3);

    let keys = store.keys.borrow();
    assert_eq!(keys.len(), 2);
    assert!(keys[0].ends_with("/skills_a.xlsx"));
    assert!(keys[1].ends_with("/skills_b.xlsx"));

    let row = &wh.rows_in(TableKind::Engineer)[0];
    assert_eq!(row["excel_skills"], serde_json::json!(["Java", "AWS", "Python"]));
    assert_eq!(
        row["fileURL"],
        format!(
            "https://storage.googleapis.com/test-bucket/{}, https://storage.googleapis.com/test-bucket/{}",
            keys[0], keys[1]
        )
    );
}
