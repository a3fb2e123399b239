//! Persistence: fingerprint existence checks and record inserts.

pub mod bigquery;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::model::record::{PersistedRecord, TableKind};

pub use bigquery::BigQueryWarehouse;

/// Two append-only tables keyed by fingerprint.
pub trait Warehouse {
    /// Whether `table` holds a row with this fingerprint.
    fn exists(&self, table: TableKind, fingerprint: &str) -> Result<bool>;

    /// Append one JSON row to `table`.
    fn insert_row(&self, table: TableKind, row: &Value) -> Result<()>;
}

/// Existence check that fails open: an error is logged and reads as absent.
pub fn fingerprint_exists(warehouse: &dyn Warehouse, table: TableKind, fp: &Fingerprint) -> bool {
    match warehouse.exists(table, fp.as_str()) {
        Ok(found) => found,
        Err(e) => {
            warn!(table = %table, fingerprint = %fp, error = %e, "Existence check failed, assuming new");
            false
        }
    }
}

/// Whether either destination table already holds `fp`.
///
/// Tables are consulted in [`TableKind::ALL`] order, stopping at the first hit.
pub fn already_ingested(warehouse: &dyn Warehouse, fp: &Fingerprint) -> bool {
    TableKind::ALL.iter().any(|&table| {
        let found = fingerprint_exists(warehouse, table, fp);
        if found {
            debug!(table = %table, fingerprint = %fp, "Fingerprint already stored");
        }
        found
    })
}

/// Insert a record into the table its kind selects.
pub fn write_record(warehouse: &dyn Warehouse, record: &PersistedRecord) -> Result<()> {
    warehouse.insert_row(record.table(), &record.to_json())
}
