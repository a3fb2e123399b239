//! Warehouse rows.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::classification::{Classification, EngineerProfile, ProjectPosting};

/// Destination table for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Engineer,
    Project,
}

impl TableKind {
    /// Tables in the order the existence check consults them.
    pub const ALL: [TableKind; 2] = [TableKind::Engineer, TableKind::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engineer => "engineer",
            Self::Project => "project",
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row in the engineer table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineerRecord {
    pub fingerprint: String,
    pub sent_at: String,
    pub engineer_name: String,
    pub main_skills: String,
    pub years_of_experience: i64,
    pub monthly_rate: i64,
    pub available_from: String,
    pub gender: String,
    pub age: i64,
    pub nearest_station: String,
    pub main_text: String,
    pub subject: String,
    pub sender_name: String,
    pub sender_company: String,
    #[serde(rename = "fileURL")]
    pub file_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excel_skills: Option<Vec<String>>,
    pub extracted_at: String,
}

/// Row in the project table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    pub fingerprint: String,
    pub sent_at: String,
    pub project_name: String,
    pub location: String,
    pub period: String,
    pub price: i64,
    pub required_skills: String,
    pub main_text: String,
    pub subject: String,
    pub sender_name: String,
    pub sender_company: String,
    #[serde(rename = "fileURL")]
    pub file_url: String,
    pub extracted_at: String,
}

/// A row ready for insertion, routed by its variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PersistedRecord {
    Engineer(EngineerRecord),
    Project(ProjectRecord),
}

impl PersistedRecord {
    pub fn table(&self) -> TableKind {
        match self {
            Self::Engineer(_) => TableKind::Engineer,
            Self::Project(_) => TableKind::Project,
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            Self::Engineer(r) => &r.fingerprint,
            Self::Project(r) => &r.fingerprint,
        }
    }

    /// The row as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain structs of strings and integers cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Everything besides the classification that goes into a row.
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    pub fingerprint: &'a str,
    pub sent_at: &'a str,
    pub subject: &'a str,
    pub file_urls: &'a [String],
    pub excel_skills: &'a [String],
    pub extracted_at: DateTime<Utc>,
}

/// Map a classification onto its destination row. `Other` has no row.
pub fn build_record(classification: &Classification, ctx: &RecordContext<'_>) -> Option<PersistedRecord> {
    match classification {
        Classification::Engineer(e) => Some(PersistedRecord::Engineer(engineer_record(e, ctx))),
        Classification::Project(p) => Some(PersistedRecord::Project(project_record(p, ctx))),
        Classification::Other(_) => None,
    }
}

fn engineer_record(e: &EngineerProfile, ctx: &RecordContext<'_>) -> EngineerRecord {
    EngineerRecord {
        fingerprint: ctx.fingerprint.to_string(),
        sent_at: ctx.sent_at.to_string(),
        engineer_name: e.engineer_name.clone(),
        main_skills: e.main_skills.clone(),
        years_of_experience: e.years_of_experience,
        monthly_rate: e.monthly_rate,
        available_from: e.available_from.clone(),
        gender: e.gender.clone(),
        age: e.age,
        nearest_station: e.nearest_station.clone(),
        main_text: e.main_text.clone(),
        subject: ctx.subject.to_string(),
        sender_name: e.sender.sender_name.clone(),
        sender_company: e.sender.sender_company.clone(),
        file_url: ctx.file_urls.join(", "),
        excel_skills: (!ctx.excel_skills.is_empty()).then(|| ctx.excel_skills.to_vec()),
        extracted_at: timestamp(ctx.extracted_at),
    }
}

fn project_record(p: &ProjectPosting, ctx: &RecordContext<'_>) -> ProjectRecord {
    ProjectRecord {
        fingerprint: ctx.fingerprint.to_string(),
        sent_at: ctx.sent_at.to_string(),
        project_name: ctx.subject.to_string(),
        location: p.location.clone(),
        period: p.period.clone(),
        price: p.price,
        required_skills: p.required_skills.clone(),
        main_text: p.main_text.clone(),
        subject: ctx.subject.to_string(),
        sender_name: p.sender.sender_name.clone(),
        sender_company: p.sender.sender_company.clone(),
        file_url: ctx.file_urls.join(", "),
        extracted_at: timestamp(ctx.extracted_at),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}
