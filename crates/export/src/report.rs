use chrono::{DateTime, TimeZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Narrative analysis, exported as a document.
    Report,
    /// Tabular result, exported as a spreadsheet.
    Data,
}

/// Title used for an analytics export created at `at`.
///
/// ```
/// use agenthub_export::{report_title, ReportKind};
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 14, 3, 9).unwrap();
/// assert_eq!(report_title(ReportKind::Data, &at), "Analytics Data - 14:03:09");
/// ```
pub fn report_title<Tz>(kind: ReportKind, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let label = match kind {
        ReportKind::Report => "Analytics Report",
        ReportKind::Data => "Analytics Data",
    };
    format!("{label} - {}", at.format("%H:%M:%S"))
}

/// Split comma-separated text into rows of cells. No quoting rules apply and
/// cells are kept as text.
pub fn rows_from_csv(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(',').map(str::to_owned).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn rows_keep_column_order_and_text() {
        let rows = rows_from_csv("region,total\nnorth,0042\r\nsouth,\n");

        assert_eq!(
            rows,
            vec![
                vec!["region".to_string(), "total".to_string()],
                vec!["north".to_string(), "0042".to_string()],
                vec!["south".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn empty_text_has_no_rows() {
        assert!(rows_from_csv("").is_empty());
        assert!(rows_from_csv("\n\n").is_empty());
    }

    #[test]
    fn report_title_uses_wall_clock_time() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap();
        assert_eq!(
            report_title(ReportKind::Report, &at),
            "Analytics Report - 09:05:00"
        );
    }
}
