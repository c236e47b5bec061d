//! Per-row send outcomes and the status column they are written to.
//!
//! A row is eligible only while its status cell is blank. Outcomes are held
//! in memory for the whole run and written back in one batch, so readers of
//! the sheet never see a half-updated column.

use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone};

use crate::config::MergeConfig;
use crate::data::{Schema, Sheet, Table};

pub const SENT_PREFIX: &str = "Email sent on ";
pub const ERROR_PREFIX: &str = "Error: ";
pub const SKIPPED_PREFIX: &str = "Skipped: Status already present";

/// `Email sent on 1/2/24 3:04 PM`, in the timestamp's own zone.
pub fn sent_status<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("{SENT_PREFIX}{}", at.format("%-m/%-d/%y %-I:%M %p"))
}

/// `Error: <reason>.` with exactly one trailing period.
pub fn error_status(reason: &str) -> String {
    format!("{ERROR_PREFIX}{}.", reason.trim().trim_end_matches('.'))
}

pub fn skipped_status(previous: &str) -> String {
    format!("{SKIPPED_PREFIX} ('{previous}')")
}

pub fn attachment_error_status(reason: &str) -> String {
    format!("Attachment error: {reason}")
}

/// What happened to one row during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Sent {
        at: DateTime<Local>,
        attachment_errors: Vec<String>,
    },
    Failed {
        reason: String,
        attachment_errors: Vec<String>,
    },
    /// The status cell was already filled in.
    Skipped { previous: String },
    /// The run was cancelled before this row was visited.
    Cancelled,
}

impl RowOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RowOutcome::Failed { .. })
    }
}

/// Sent / failed / skipped totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct StatusLedger {
    previous: Vec<String>,
    outcomes: Vec<Option<RowOutcome>>,
    separator: String,
    annotate_skipped: bool,
}

impl StatusLedger {
    /// Snapshot the status cells of every data row.
    pub fn new(table: &Table, schema: &Schema, config: &MergeConfig) -> Self {
        let previous: Vec<String> = (0..table.data_row_count())
            .map(|row| {
                if schema.status_created {
                    String::new()
                } else {
                    table.cell(row, schema.status).to_string()
                }
            })
            .collect();
        let outcomes = vec![None; previous.len()];
        Self {
            previous,
            outcomes,
            separator: config.status_separator.clone(),
            annotate_skipped: config.annotate_skipped,
        }
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Status text as it was when the run started. `row` is zero-based.
    pub fn previous(&self, row: usize) -> &str {
        self.previous.get(row).map(String::as_str).unwrap_or("")
    }

    pub fn should_process(&self, row: usize) -> bool {
        self.previous(row).trim().is_empty()
    }

    pub fn record(&mut self, row: usize, outcome: RowOutcome) {
        if let Some(slot) = self.outcomes.get_mut(row) {
            *slot = Some(outcome);
        }
    }

    pub fn outcome(&self, row: usize) -> Option<&RowOutcome> {
        self.outcomes.get(row).and_then(Option::as_ref)
    }

    /// The text that will be written to the status cell of `row`.
    pub fn status_text(&self, row: usize) -> String {
        let previous = self.previous(row);
        match self.outcome(row) {
            None | Some(RowOutcome::Cancelled) => previous.to_string(),
            Some(RowOutcome::Skipped { previous }) => {
                if self.annotate_skipped {
                    skipped_status(previous)
                } else {
                    previous.clone()
                }
            }
            Some(RowOutcome::Sent {
                at,
                attachment_errors,
            }) => self.join(attachment_errors, sent_status(at)),
            Some(RowOutcome::Failed {
                reason,
                attachment_errors,
            }) => self.join(attachment_errors, error_status(reason)),
        }
    }

    fn join(&self, attachment_errors: &[String], status: String) -> String {
        attachment_errors
            .iter()
            .map(|e| attachment_error_status(e))
            .chain(std::iter::once(status))
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    pub fn statuses(&self) -> Vec<String> {
        (0..self.len()).map(|row| self.status_text(row)).collect()
    }

    /// 1-based sheet row numbers (header is row 1) of failed rows.
    pub fn error_rows(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.as_ref().is_some_and(RowOutcome::is_failure))
            .map(|(row, _)| row + 2)
            .collect()
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for outcome in &self.outcomes {
            match outcome {
                Some(RowOutcome::Sent { .. }) => counts.sent += 1,
                Some(RowOutcome::Failed { .. }) => counts.failed += 1,
                Some(RowOutcome::Skipped { .. }) | Some(RowOutcome::Cancelled) | None => {
                    counts.skipped += 1
                }
            }
        }
        counts
    }

    /// Write every status in one batch, then flag failed rows in one batch.
    pub fn flush<S: Sheet + ?Sized>(
        &self,
        sheet: &mut S,
        schema: &Schema,
        highlight: bool,
    ) -> crate::Result<()> {
        sheet.write_status_column(schema.status, schema.status_header(), &self.statuses())?;
        if highlight {
            sheet.highlight_rows(&self.error_rows())?;
        }
        Ok(())
    }
}
