//! BigQuery REST collaborator.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use ureq::Agent;

use super::Warehouse;
use crate::config::WarehouseConfig;
use crate::error::{HarvestError, Result};
use crate::model::record::TableKind;

/// Tables in one BigQuery dataset, reached with `jobs.query` and
/// `tabledata.insertAll`.
pub struct BigQueryWarehouse {
    agent: Agent,
    config: WarehouseConfig,
}

impl BigQueryWarehouse {
    pub fn new(config: WarehouseConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(60)))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent, config }
    }

    fn table_name(&self, table: TableKind) -> &str {
        match table {
            TableKind::Engineer => &self.config.engineer_table,
            TableKind::Project => &self.config.project_table,
        }
    }

    /// Fully qualified table id for Standard SQL.
    pub fn table_ref(&self, table: TableKind) -> String {
        format!(
            "`{}.{}.{}`",
            self.config.project_id,
            self.config.dataset,
            self.table_name(table)
        )
    }

    fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let mut response = self
            .agent
            .post(url)
            .header("Authorization", &format!("Bearer {}", self.config.access_token))
            .header("Content-Type", "application/json")
            .send_json(body)
            .map_err(|e| HarvestError::Warehouse(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| HarvestError::Warehouse(format!("reading response failed: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(HarvestError::Warehouse(format!(
                "HTTP {status}: {}",
                text.chars().take(300).collect::<String>()
            )));
        }
        serde_json::from_str(&text)
            .map_err(|e| HarvestError::Warehouse(format!("unreadable response: {e}")))
    }
}

/// Standard SQL point lookup with a named parameter.
pub fn existence_query(table_ref: &str, fingerprint: &str) -> Value {
    json!({
        "query": format!("SELECT 1 FROM {table_ref} WHERE fingerprint = @fingerprint LIMIT 1"),
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": [{
            "name": "fingerprint",
            "parameterType": { "type": "STRING" },
            "parameterValue": { "value": fingerprint }
        }],
        "timeoutMs": 30000
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default = "completed")]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<Value>,
}

fn completed() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<Value>,
}

impl Warehouse for BigQueryWarehouse {
    fn exists(&self, table: TableKind, fingerprint: &str) -> Result<bool> {
        let url = format!(
            "{}/projects/{}/queries",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id
        );
        let body = existence_query(&self.table_ref(table), fingerprint);
        let response: QueryResponse = serde_json::from_value(self.post(&url, &body)?)
            .map_err(|e| HarvestError::Warehouse(format!("unexpected query response: {e}")))?;
        if !response.job_complete {
            return Err(HarvestError::Warehouse("existence query timed out".to_string()));
        }
        debug!(table = %table, rows = response.rows.len(), "Existence query");
        Ok(!response.rows.is_empty())
    }

    fn insert_row(&self, table: TableKind, row: &Value) -> Result<()> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id,
            self.config.dataset,
            self.table_name(table)
        );
        let body = json!({ "rows": [{ "json": row }] });
        let response: InsertAllResponse = serde_json::from_value(self.post(&url, &body)?)
            .map_err(|e| HarvestError::Warehouse(format!("unexpected insert response: {e}")))?;
        if !response.insert_errors.is_empty() {
            return Err(HarvestError::Warehouse(format!(
                "row rejected by {}: {}",
                self.table_name(table),
                Value::Array(response.insert_errors)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> BigQueryWarehouse {
        BigQueryWarehouse::new(WarehouseConfig {
            project_id: "acme".into(),
            ..WarehouseConfig::default()
        })
    }

    #[test]
    fn test_table_ref() {
        let wh = warehouse();
        assert_eq!(wh.table_ref(TableKind::Engineer), "`acme.gmailData.EngineerData`");
        assert_eq!(wh.table_ref(TableKind::Project), "`acme.gmailData.ProjectData`");
    }

    #[test]
    fn test_existence_query_is_parameterized() {
        let q = existence_query("`p.d.t`", "abc' OR 1=1 --");
        let sql = q["query"].as_str().unwrap();
        assert!(sql.contains("fingerprint = @fingerprint"));
        assert!(!sql.contains("abc"));
        assert_eq!(q["queryParameters"][0]["parameterValue"]["value"], "abc' OR 1=1 --");
    }

    #[test]
    fn test_insert_errors_detected() {
        let ok: InsertAllResponse = serde_json::from_str(r#"{"kind":"bigquery#tableDataInsertAllResponse"}"#).unwrap();
        assert!(ok.insert_errors.is_empty());
        let bad: InsertAllResponse =
            serde_json::from_str(r#"{"insertErrors":[{"index":0,"errors":[{"reason":"invalid"}]}]}"#).unwrap();
        assert_eq!(bad.insert_errors.len(), 1);
    }
}
