//! Render a spreadsheet attachment as text for skill extraction.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::error::{HarvestError, Result};

/// Separator placed between the non-empty cells of a row.
pub const CELL_SEPARATOR: &str = " | ";

/// Read the first worksheet of an `.xlsx`, `.xlsm` or `.xls` payload.
///
/// Each non-blank row becomes one line of its non-empty cells joined with
/// [`CELL_SEPARATOR`].
pub fn sheet_text(bytes: &[u8]) -> Result<String> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| HarvestError::Spreadsheet(format!("cannot open workbook: {e}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| HarvestError::Spreadsheet("workbook has no sheets".to_string()))?
        .map_err(|e| HarvestError::Spreadsheet(format!("cannot read sheet: {e}")))?;

    Ok(render_rows(range.rows()))
}

/// Join rows of cells into pipe-delimited lines, skipping blanks.
pub fn render_rows<'a>(rows: impl Iterator<Item = &'a [Data]>) -> String {
    let mut lines = Vec::new();
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .filter(|cell| !matches!(cell, Data::Empty))
            .map(ToString::to_string)
            .filter(|text| !text.is_empty())
            .collect();
        let line = cells.join(CELL_SEPARATOR);
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}
