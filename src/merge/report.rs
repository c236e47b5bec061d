use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowResult {
    Sent,
    Failed,
    Skipped,
}

/// One data row's result, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowReport {
    /// 1-based sheet row (the header is row 1).
    pub row: usize,
    pub email: String,
    pub result: RowResult,
    /// Text written (or, in a dry run, that would be written) to the status cell.
    pub status: String,
}

/// End-of-run summary. Not persisted beyond the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Row-level problems in row order, e.g. `Row 3 (bad): Invalid or missing email address`.
    pub errors: Vec<String>,
    pub rows: Vec<RowReport>,
    pub dry_run: bool,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.sent + self.failed + self.skipped
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowReport> {
        self.rows.iter().filter(|r| r.result == RowResult::Failed)
    }

    /// One-line summary for logs and terminal output.
    pub fn summary(&self) -> String {
        let verb = if self.dry_run { "would send" } else { "sent" };
        format!(
            "{} {verb}, {} failed, {} skipped ({} rows)",
            self.sent,
            self.failed,
            self.skipped,
            self.total()
        )
    }
}

pub(crate) fn row_error(row: usize, email: &str, reason: &str) -> String {
    if email.is_empty() {
        format!("Row {row}: {reason}")
    } else {
        format!("Row {row} ({email}): {reason}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_total() {
        let result = BatchResult {
            sent: 2,
            failed: 1,
            skipped: 3,
            ..BatchResult::default()
        };
        assert_eq!(result.total(), 6);
        assert_eq!(result.summary(), "2 sent, 1 failed, 3 skipped (6 rows)");
    }

    #[test]
    fn test_row_error_format() {
        assert_eq!(
            row_error(3, "bad", "Invalid or missing email address"),
            "Row 3 (bad): Invalid or missing email address"
        );
        assert_eq!(row_error(4, "", "x"), "Row 4: x");
    }

    #[test]
    fn test_serializes_result_kind() {
        let row = RowReport {
            row: 2,
            email: "a@b.com".into(),
            result: RowResult::Sent,
            status: "Email sent on 1/2/24 3:04 PM".into(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["result"], "sent");
        assert_eq!(json["row"], 2);
    }
}
