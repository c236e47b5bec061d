use serde::Serialize;

use crate::merge::report::BatchResult;

/// What the first data row would look like, shown before anything is sent.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    /// Sheet row the sample was rendered from.
    pub row: usize,
    pub to: String,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: String,
    pub total_rows: usize,
    /// Rows whose status cell is blank and will be processed.
    pub eligible_rows: usize,
    /// Placeholders naming no header; they will appear verbatim.
    pub unknown_placeholders: Vec<String>,
    /// Header of the status column and whether the run will create it.
    pub status_header: String,
    pub status_column_created: bool,
}

/// The operator-facing side of a run: a yes/no gate and a place for the summary.
pub trait Host {
    /// Return `true` to send, `false` to cancel without side effects.
    fn confirm(&mut self, preview: &Preview) -> bool;

    fn report(&mut self, result: &BatchResult);
}

/// Confirms every preview and keeps the last report. Useful for unattended runs.
#[derive(Debug, Default)]
pub struct AutoConfirm {
    pub previews: Vec<Preview>,
    pub last_report: Option<BatchResult>,
}

impl Host for AutoConfirm {
    fn confirm(&mut self, preview: &Preview) -> bool {
        self.previews.push(preview.clone());
        true
    }

    fn report(&mut self, result: &BatchResult) {
        self.last_report = Some(result.clone());
    }
}
