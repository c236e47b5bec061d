//! Preview gate and batch orchestration.
//!
//! A run moves `Idle -> PreviewPending -> Confirmed -> Running -> Completed`,
//! or stops at `Cancelled` after the preview. Precondition and critical
//! failures end in `Aborted` without touching the sheet.

mod preview;
mod report;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;

pub use preview::{AutoConfirm, Host, Preview};
pub use report::{BatchResult, RowReport, RowResult};

use crate::attach::{self, DocumentConverter};
use crate::data::{Schema, Sheet, Table};
use crate::ledger::{attachment_error_status, RowOutcome, StatusLedger};
use crate::render::{render_row, resolve_css, Renderer};
use crate::smtp::{Mailer, OutgoingMail};
use crate::template::{unknown_placeholders, validate_template, Template};
use crate::validate::{recipient, validate_row};
use crate::MergeError;
use report::row_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    PreviewPending,
    Confirmed,
    Running,
    Completed,
    Cancelled,
    Aborted,
}

impl RunState {
    pub fn name(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::PreviewPending => "preview-pending",
            RunState::Confirmed => "confirmed",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a driven run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(BatchResult),
    Cancelled,
}

/// Everything resolved once before the row loop.
struct Prepared {
    table: Table,
    schema: Schema,
    renderer: Renderer,
    css: Option<String>,
}

/// One merge run over one sheet.
pub struct MergeRun<S> {
    template: Template,
    template_dir: PathBuf,
    sheet: S,
    state: RunState,
    prepared: Option<Prepared>,
    cancel_flag: Option<Arc<AtomicBool>>,
    dry_run: bool,
}

impl<S: Sheet> MergeRun<S> {
    pub fn new(template: Template, sheet: S) -> Self {
        Self {
            template,
            template_dir: PathBuf::from("."),
            sheet,
            state: RunState::Idle,
            prepared: None,
            cancel_flag: None,
            dry_run: false,
        }
    }

    /// Directory that relative `stylesheet` paths are resolved against.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    /// Checked between rows; once set, the remaining rows are left untouched.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// Render, validate and resolve attachments, but neither send nor write the sheet.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn sheet(&self) -> &S {
        &self.sheet
    }

    pub fn into_sheet(self) -> S {
        self.sheet
    }

    fn expect_state(&self, expected: RunState) -> crate::Result<()> {
        if self.state != expected {
            return Err(MergeError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    /// Check preconditions and render the first data row. Nothing is written or sent.
    pub fn preview(&mut self) -> crate::Result<Preview> {
        self.expect_state(RunState::Idle)?;
        self.state = RunState::PreviewPending;
        match self.prepare() {
            Ok(preview) => Ok(preview),
            Err(e) => {
                self.state = RunState::Aborted;
                tracing::warn!(error = %e, "merge run aborted before preview");
                Err(e)
            }
        }
    }

    fn prepare(&mut self) -> crate::Result<Preview> {
        validate_template(&self.template)?;
        let config = &self.template.config;

        let table = self.sheet.load()?;
        if table.data_row_count() == 0 {
            return Err(MergeError::NoDataRows);
        }
        let schema = Schema::resolve(&table.headers, &config.columns)?;
        let renderer = Renderer::new(&schema.headers, &config.delimiters)?;
        let css = resolve_css(&self.template, &self.template_dir)?;

        let fields = row_fields(&table, &schema, 0);
        let to = recipient(&table, &schema, 0);
        let sample = render_row(&renderer, &self.template, &fields, to, css.as_deref())?;

        let ledger = StatusLedger::new(&table, &schema, config);
        let eligible_rows = (0..ledger.len()).filter(|&r| ledger.should_process(r)).count();

        let preview = Preview {
            row: 2,
            to: sample.to,
            subject: sample.subject,
            html_body: sample.html_body,
            text_body: sample.text_body,
            total_rows: table.data_row_count(),
            eligible_rows,
            unknown_placeholders: unknown_placeholders(&self.template, &schema.headers),
            status_header: schema.status_header().to_string(),
            status_column_created: schema.status_created,
        };
        tracing::info!(
            rows = preview.total_rows,
            eligible = preview.eligible_rows,
            "preview ready"
        );
        if !preview.unknown_placeholders.is_empty() {
            tracing::warn!(placeholders = ?preview.unknown_placeholders, "placeholders match no column");
        }

        self.prepared = Some(Prepared {
            table,
            schema,
            renderer,
            css,
        });
        Ok(preview)
    }

    /// Operator accepted the preview.
    pub fn confirm(&mut self) -> crate::Result<()> {
        self.expect_state(RunState::PreviewPending)?;
        self.state = RunState::Confirmed;
        Ok(())
    }

    /// Operator declined the preview. Terminal, no side effects.
    pub fn cancel(&mut self) -> crate::Result<()> {
        self.expect_state(RunState::PreviewPending)?;
        self.state = RunState::Cancelled;
        self.prepared = None;
        tracing::info!("merge run cancelled at preview");
        Ok(())
    }

    /// Process every data row in order, then write the status column once.
    pub async fn execute<M, C>(&mut self, mailer: &M, converter: &C) -> crate::Result<BatchResult>
    where
        M: Mailer,
        C: DocumentConverter,
    {
        self.expect_state(RunState::Confirmed)?;
        let Some(prepared) = self.prepared.take() else {
            return Err(MergeError::InvalidState {
                expected: RunState::PreviewPending.name(),
                actual: self.state.name(),
            });
        };
        self.state = RunState::Running;

        let config = &self.template.config;
        let Prepared {
            table,
            schema,
            renderer,
            css,
        } = prepared;
        let mut ledger = StatusLedger::new(&table, &schema, config);
        let mut errors = Vec::new();
        let mut emails = Vec::with_capacity(table.data_row_count());

        tracing::info!(rows = table.data_row_count(), dry_run = self.dry_run, "merge run started");

        for row in 0..table.data_row_count() {
            let fields = row_fields(&table, &schema, row);
            let email = recipient(&table, &schema, row).to_string();
            let sheet_row = row + 2;

            if self
                .cancel_flag
                .as_ref()
                .is_some_and(|f| f.load(Ordering::Relaxed))
            {
                ledger.record(row, RowOutcome::Cancelled);
                emails.push(email);
                continue;
            }

            if !ledger.should_process(row) {
                tracing::debug!(row = sheet_row, "status already present, skipping");
                ledger.record(
                    row,
                    RowOutcome::Skipped {
                        previous: ledger.previous(row).to_string(),
                    },
                );
                emails.push(email);
                continue;
            }

            let validation = validate_row(&email);
            if !validation.ok {
                let reason = validation.reason.unwrap_or_default();
                tracing::warn!(row = sheet_row, email = %email, reason = %reason, "row rejected");
                errors.push(row_error(sheet_row, &email, &reason));
                ledger.record(
                    row,
                    RowOutcome::Failed {
                        reason,
                        attachment_errors: Vec::new(),
                    },
                );
                emails.push(email);
                continue;
            }

            let rendered = match render_row(&renderer, &self.template, &fields, &email, css.as_deref())
            {
                Ok(rendered) => rendered,
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(row = sheet_row, email = %email, error = %reason, "render failed");
                    errors.push(row_error(sheet_row, &email, &reason));
                    ledger.record(
                        row,
                        RowOutcome::Failed {
                            reason,
                            attachment_errors: Vec::new(),
                        },
                    );
                    emails.push(email);
                    continue;
                }
            };

            let resolved = match schema.attachment {
                Some(col) => attach::resolve(table.cell(row, col), converter).await,
                None => attach::AttachmentOutcome::default(),
            };
            for e in &resolved.errors {
                errors.push(row_error(sheet_row, &email, &attachment_error_status(e)));
            }

            let mail = OutgoingMail {
                email: rendered,
                attachments: resolved.attachments,
            };
            let sent = if self.dry_run {
                Ok(())
            } else {
                mailer.send(&mail).await
            };
            // Attachments are released with the mail here.
            drop(mail);

            let outcome = match sent {
                Ok(()) => {
                    tracing::debug!(row = sheet_row, email = %email, "sent");
                    RowOutcome::Sent {
                        at: Local::now(),
                        attachment_errors: resolved.errors,
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(row = sheet_row, email = %email, error = %reason, "send failed");
                    errors.push(row_error(sheet_row, &email, &reason));
                    RowOutcome::Failed {
                        reason,
                        attachment_errors: resolved.errors,
                    }
                }
            };
            ledger.record(row, outcome);
            emails.push(email);
        }

        if !self.dry_run {
            if let Err(e) = ledger.flush(&mut self.sheet, &schema, config.highlight_errors) {
                self.state = RunState::Aborted;
                tracing::error!(error = %e, "failed to write status column");
                return Err(e);
            }
        }

        let counts = ledger.counts();
        let rows = emails
            .into_iter()
            .enumerate()
            .map(|(row, email)| RowReport {
                row: row + 2,
                email,
                result: match ledger.outcome(row) {
                    Some(RowOutcome::Sent { .. }) => RowResult::Sent,
                    Some(RowOutcome::Failed { .. }) => RowResult::Failed,
                    _ => RowResult::Skipped,
                },
                status: ledger.status_text(row),
            })
            .collect();

        let result = BatchResult {
            sent: counts.sent,
            failed: counts.failed,
            skipped: counts.skipped,
            errors,
            rows,
            dry_run: self.dry_run,
        };
        self.state = RunState::Completed;
        tracing::info!(summary = %result.summary(), "merge run completed");
        Ok(result)
    }
}

/// Field map over every known header. The status value is blank for any row
/// that reaches rendering, so it is forced empty here.
fn row_fields(table: &Table, schema: &Schema, row: usize) -> crate::data::FieldMap {
    let mut fields = table.field_map(&schema.headers, row);
    fields.insert(schema.status_header(), "");
    fields
}

/// Drive a run from preview to report.
pub async fn run_merge<S, H, M, C>(
    run: &mut MergeRun<S>,
    host: &mut H,
    mailer: &M,
    converter: &C,
) -> crate::Result<RunOutcome>
where
    S: Sheet,
    H: Host + ?Sized,
    M: Mailer,
    C: DocumentConverter,
{
    let preview = run.preview()?;
    if !host.confirm(&preview) {
        run.cancel()?;
        return Ok(RunOutcome::Cancelled);
    }
    run.confirm()?;
    let result = run.execute(mailer, converter).await?;
    host.report(&result);
    Ok(RunOutcome::Completed(result))
}

/// Directory of a template file, for resolving its relative paths.
pub fn template_dir_of(template_path: &Path) -> PathBuf {
    template_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
