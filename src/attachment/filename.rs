//! Replacement names for attachments whose filename decoded to mojibake.

use chrono::NaiveDateTime;

use crate::model::classification::Classification;
use crate::model::message::spreadsheet_extension;

/// Extension for a replacement name: the original's spreadsheet extension if
/// it survived, else one implied by the declared MIME type.
pub fn extension_for(original: &str, mime_type: &str) -> &'static str {
    if let Some(ext) = spreadsheet_extension(original) {
        return ext;
    }
    let lower = mime_type.to_ascii_lowercase();
    if lower.contains("sheet") || lower.contains("excel") {
        if lower.contains("officedocument") {
            ".xlsx"
        } else if lower.contains("macroenabled") {
            ".xlsm"
        } else {
            ".xls"
        }
    } else {
        ".xlsx"
    }
}

/// Choose a safe name for a garbled attachment.
///
/// Engineer postings yield `<name>_<station><ext>` or `<name><ext>`;
/// everything else falls back to `temp_<YYYYMMDD_HHMMSS><ext>` stamped with
/// `now` (local wall-clock time).
pub fn recovered_name(
    classification: Option<&Classification>,
    original: &str,
    mime_type: &str,
    now: NaiveDateTime,
) -> String {
    let ext = extension_for(original, mime_type);

    let engineer = classification.and_then(Classification::as_engineer);
    let name = engineer.map(|e| clean_component(&e.engineer_name, false));
    let station = engineer.map(|e| clean_component(&e.nearest_station, true));

    match (name.filter(|n| !n.is_empty()), station.filter(|s| !s.is_empty())) {
        (Some(name), Some(station)) => format!("{name}_{station}{ext}"),
        (Some(name), None) => format!("{name}{ext}"),
        _ => temp_name(ext, now),
    }
}

/// `temp_<YYYYMMDD_HHMMSS><ext>`.
pub fn temp_name(ext: &str, now: NaiveDateTime) -> String {
    format!("temp_{}{ext}", now.format("%Y%m%d_%H%M%S"))
}

fn clean_component(raw: &str, is_station: bool) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '（' | '）'))
        .filter(|&c| !(is_station && c == '駅'))
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classification::{EngineerProfile, ProjectPosting};
    use chrono::NaiveDate;

    const MIME_XLS: &str = "application/vnd.ms-excel";

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(9, 5, 3)
            .unwrap()
    }

    fn engineer(name: &str, station: &str) -> Classification {
        Classification::Engineer(EngineerProfile {
            engineer_name: name.into(),
            nearest_station: station.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_name_and_station() {
        let c = engineer("A.K", "Shinjuku");
        assert_eq!(recovered_name(Some(&c), "����.xlsx", "", now()), "A.K_Shinjuku.xlsx");
    }

    #[test]
    fn test_markers_stripped() {
        let c = engineer("（A.K）", "新宿駅 (JR)");
        assert_eq!(recovered_name(Some(&c), "����.xlsm", "", now()), "A.K_新宿 JR.xlsm");
    }

    #[test]
    fn test_name_only() {
        let c = engineer("T.Y", "");
        assert_eq!(recovered_name(Some(&c), "����", MIME_XLS, now()), "T.Y.xls");
    }

    #[test]
    fn test_temp_name_fallback() {
        assert_eq!(recovered_name(None, "����", "", now()), "temp_20240701_090503.xlsx");
        let p = Classification::Project(ProjectPosting::default());
        assert_eq!(
            recovered_name(Some(&p), "����", "application/vnd.ms-excel.sheet.macroEnabled.12", now()),
            "temp_20240701_090503.xlsm"
        );
        // Station alone is not enough
        let c = engineer("", "Shinjuku");
        assert_eq!(recovered_name(Some(&c), "����.xlsx", "", now()), "temp_20240701_090503.xlsx");
    }

    #[test]
    fn test_extension_from_mime() {
        let xlsx = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
        assert_eq!(extension_for("����", xlsx), ".xlsx");
        assert_eq!(extension_for("����", "application/vnd.ms-excel"), ".xls");
        assert_eq!(extension_for("����", "application/octet-stream"), ".xlsx");
        assert_eq!(extension_for("a.XLS", xlsx), ".xls");
    }

    #[test]
    fn test_path_separators_replaced() {
        let c = engineer("A/K", "");
        assert_eq!(recovered_name(Some(&c), "x.xlsx", "", now()), "A_K.xlsx");
    }
}
