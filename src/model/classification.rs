//! Typed classifier output.
//!
//! The inference service answers with loosely-typed JSON. Everything is
//! validated here, at the parse boundary: the `type` tag selects a variant,
//! numeric fields are coerced to integers and string fields tolerate nulls,
//! numbers and arrays. Anything that cannot be mapped onto a variant is an
//! [`InferenceError::Invalid`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::InferenceError;

/// Who sent the mail, as read from its signature block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SenderInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub sender_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub sender_company: String,
}

/// An engineer availability posting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineerProfile {
    #[serde(deserialize_with = "lenient_string")]
    pub engineer_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub main_skills: String,
    #[serde(deserialize_with = "lenient_non_negative")]
    pub years_of_experience: i64,
    /// Man-yen, exactly as the model returned it.
    #[serde(deserialize_with = "lenient_int")]
    pub monthly_rate: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub available_from: String,
    #[serde(deserialize_with = "lenient_string")]
    pub gender: String,
    #[serde(deserialize_with = "lenient_int")]
    pub age: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub nearest_station: String,
    #[serde(flatten)]
    pub sender: SenderInfo,
    /// Original body text, attached after parsing.
    #[serde(skip_deserializing)]
    pub main_text: String,
}

/// A staffing project posting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectPosting {
    #[serde(deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(deserialize_with = "lenient_string")]
    pub period: String,
    /// Man-yen, exactly as the model returned it.
    #[serde(deserialize_with = "lenient_int")]
    pub price: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub required_skills: String,
    #[serde(flatten)]
    pub sender: SenderInfo,
    #[serde(skip_deserializing)]
    pub main_text: String,
}

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Classification {
    Project(ProjectPosting),
    Engineer(EngineerProfile),
    Other(SenderInfo),
}

impl Classification {
    /// The lowercase type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Project(_) => "project",
            Self::Engineer(_) => "engineer",
            Self::Other(_) => "other",
        }
    }

    pub fn sender(&self) -> &SenderInfo {
        match self {
            Self::Project(p) => &p.sender,
            Self::Engineer(e) => &e.sender,
            Self::Other(s) => s,
        }
    }

    pub fn as_engineer(&self) -> Option<&EngineerProfile> {
        match self {
            Self::Engineer(e) => Some(e),
            _ => None,
        }
    }

    fn attach_body(&mut self, body: &str) {
        match self {
            Self::Project(p) => p.main_text = body.to_string(),
            Self::Engineer(e) => e.main_text = body.to_string(),
            Self::Other(_) => {}
        }
    }
}

/// Skill list extracted from a spreadsheet attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillSheet {
    #[serde(deserialize_with = "lenient_string_list")]
    pub excel_skills: Vec<String>,
    pub additional_info: AdditionalInfo,
}

/// Auxiliary metadata the skill extraction prompt asks for. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdditionalInfo {
    #[serde(deserialize_with = "lenient_string_list")]
    pub certifications: Vec<String>,
    #[serde(deserialize_with = "lenient_string_list")]
    pub projects: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub other: String,
}

// ── Parsing ─────────────────────────────────────────────────────

/// Remove optional Markdown code fences around a JSON answer.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        // Drop a language tag directly after an opening fence
        if let Some(tail) = rest.strip_prefix("json") {
            rest = tail;
        }
        rest = rest.trim_start();
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Parse a raw model answer into JSON, unwrapping a leading array element.
fn parse_json_object(text: &str) -> Result<Value, InferenceError> {
    let cleaned = strip_code_fences(text);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| InferenceError::Invalid(format!("not JSON: {e}")))?;

    match value {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::Invalid("empty JSON array".to_string())),
        other => Ok(other),
    }
}

/// Parse a classification answer and attach `body` as the main text.
pub fn parse_classification(text: &str, body: &str) -> Result<Classification, InferenceError> {
    let value = parse_json_object(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .ok_or_else(|| InferenceError::Invalid("missing \"type\" field".to_string()))?;

    let invalid = |e: serde_json::Error| InferenceError::Invalid(format!("bad {kind} object: {e}"));
    let mut result = match kind.as_str() {
        "project" => Classification::Project(serde_json::from_value(value.clone()).map_err(invalid)?),
        "engineer" => {
            Classification::Engineer(serde_json::from_value(value.clone()).map_err(invalid)?)
        }
        "other" => Classification::Other(serde_json::from_value(value.clone()).map_err(invalid)?),
        other => {
            return Err(InferenceError::Invalid(format!(
                "unknown classification type '{other}'"
            )))
        }
    };
    result.attach_body(body);
    Ok(result)
}

/// Parse a skill extraction answer.
pub fn parse_skill_sheet(text: &str) -> Result<SkillSheet, InferenceError> {
    let value = parse_json_object(text)?;
    if !value.is_object() {
        return Err(InferenceError::Invalid("skill answer is not an object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| InferenceError::Invalid(e.to_string()))
}

// ── Lenient field coercion ──────────────────────────────────────

/// Parse an integer string, dropping thousands separators and whitespace.
/// Returns `None` for anything else, fractional strings included. JSON
/// numbers are truncated separately in [`int_from_value`].
pub fn coerce_int(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '，') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

fn int_from_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => coerce_int(s).unwrap_or(0),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn lenient_int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(int_from_value(&value))
}

fn lenient_non_negative<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    lenient_int(d).map(|n| n.max(0))
}

fn string_from_value(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(string_from_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(string_from_value(value))
}

fn lenient_string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .map(string_from_value)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Null => Vec::new(),
        other => {
            let s = string_from_value(other);
            if s.trim().is_empty() {
                Vec::new()
            } else {
                vec![s.trim().to_string()]
            }
        }
    })
}
