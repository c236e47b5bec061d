use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::data::csv::{load_csv, save_csv, CsvFormat, CsvOptions};
use crate::data::Table;
use crate::MergeError;

/// Row source and status persistence.
///
/// A merge run calls `load` once, then at most one `write_status_column` and
/// one `highlight_rows` after every row has been visited.
pub trait Sheet {
    fn load(&mut self) -> crate::Result<Table>;

    /// Replace the status column with `values`, one per data row.
    ///
    /// `column` equal to the current header count means the column does not
    /// exist yet and must be appended with `header`.
    fn write_status_column(
        &mut self,
        column: usize,
        header: &str,
        values: &[String],
    ) -> crate::Result<()>;

    /// Flag failed rows. Row numbers are 1-based sheet rows (header = 1).
    fn highlight_rows(&mut self, rows: &[usize]) -> crate::Result<()>;
}

fn apply_status_column(table: &mut Table, column: usize, header: &str, values: &[String]) {
    if column >= table.headers.len() {
        table.headers.resize(column, String::new());
        table.headers.push(header.to_string());
    }
    let width = table.headers.len();
    for (row, value) in table.rows.iter_mut().zip(values) {
        if row.len() < width {
            row.resize(width, String::new());
        }
        row[column] = value.clone();
    }
}

/// A CSV file acting as the sheet.
///
/// Plain CSV cannot carry cell colours, so failed rows are listed in a
/// sidecar `<file>.errors`, one sheet row number per line.
///
/// The status write keeps the file's separator, encoding and byte order mark.
/// Blank lines are not data rows and are dropped by the rewrite, so row
/// numbers in the report and the sidecar count from the header and refer to
/// the file as rewritten. A dry run leaves the file alone, and there the
/// numbers skip any blank lines.
#[derive(Debug)]
pub struct CsvSheet {
    path: PathBuf,
    options: CsvOptions,
    snapshot: Option<(Table, CsvFormat)>,
}

impl CsvSheet {
    pub fn new(path: impl Into<PathBuf>, options: CsvOptions) -> Self {
        Self {
            path: path.into(),
            options,
            snapshot: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn errors_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".errors");
        PathBuf::from(name)
    }
}

impl Sheet for CsvSheet {
    fn load(&mut self) -> crate::Result<Table> {
        let loaded = load_csv(&self.path, &self.options)?;
        tracing::debug!(
            path = %self.path.display(),
            rows = loaded.table.rows.len(),
            separator = %(loaded.format.separator as char).escape_default(),
            encoding = loaded.format.encoding.name(),
            "loaded sheet"
        );
        let table = loaded.table.clone();
        self.snapshot = Some((loaded.table, loaded.format));
        Ok(table)
    }

    fn write_status_column(
        &mut self,
        column: usize,
        header: &str,
        values: &[String],
    ) -> crate::Result<()> {
        if self.snapshot.is_none() {
            let loaded = load_csv(&self.path, &self.options)?;
            self.snapshot = Some((loaded.table, loaded.format));
        }
        if let Some((table, format)) = self.snapshot.as_mut() {
            apply_status_column(table, column, header, values);
            save_csv(&self.path, table, *format)?;
        }
        tracing::info!(path = %self.path.display(), rows = values.len(), "wrote status column");
        Ok(())
    }

    fn highlight_rows(&mut self, rows: &[usize]) -> crate::Result<()> {
        let errors_path = self.errors_path();
        if rows.is_empty() {
            return match std::fs::remove_file(&errors_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(MergeError::Io {
                    path: errors_path,
                    source: e,
                }),
                _ => Ok(()),
            };
        }
        let content: String = rows.iter().map(|r| format!("{r}\n")).collect();
        std::fs::write(&errors_path, content).map_err(|source| MergeError::Io {
            path: errors_path,
            source,
        })
    }
}

/// In-memory sheet for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    pub table: Table,
    /// Rows flagged by the last `highlight_rows` call.
    pub highlighted: Vec<usize>,
    pub status_writes: usize,
    pub highlight_writes: usize,
}

impl MemorySheet {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            ..Self::default()
        }
    }

    /// Status column values by header name (exact match), one per data row.
    pub fn column(&self, header: &str) -> Vec<String> {
        let Some(col) = self.table.headers.iter().position(|h| h == header) else {
            return Vec::new();
        };
        (0..self.table.rows.len())
            .map(|row| self.table.cell(row, col).to_string())
            .collect()
    }

    /// Blank a cell, the way a person clears a status to force a resend.
    pub fn clear_cell(&mut self, row: usize, header: &str) {
        if let Some(col) = self.table.headers.iter().position(|h| h == header) {
            if let Some(cell) = self.table.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
                cell.clear();
            }
        }
    }
}

impl Sheet for MemorySheet {
    fn load(&mut self) -> crate::Result<Table> {
        Ok(self.table.clone())
    }

    fn write_status_column(
        &mut self,
        column: usize,
        header: &str,
        values: &[String],
    ) -> crate::Result<()> {
        apply_status_column(&mut self.table, column, header, values);
        self.status_writes += 1;
        Ok(())
    }

    fn highlight_rows(&mut self, rows: &[usize]) -> crate::Result<()> {
        self.highlighted = rows.to_vec();
        self.highlight_writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn test_memory_sheet_appends_missing_column() {
        let mut sheet = MemorySheet::new(Table::from_rows([
            vec!["Email", "Name"],
            vec!["a@b.com", "Jo"],
            vec!["c@d.com"],
        ]));
        sheet
            .write_status_column(2, "Email Status", &["sent".into(), "err".into()])
            .unwrap();
        assert_eq!(sheet.table.headers, vec!["Email", "Name", "Email Status"]);
        assert_eq!(sheet.column("Email Status"), vec!["sent", "err"]);
        assert_eq!(sheet.table.rows[1], vec!["c@d.com", "", "err"]);
        assert_eq!(sheet.status_writes, 1);
    }

    #[test]
    fn test_memory_sheet_clear_cell() {
        let mut sheet = MemorySheet::new(Table::from_rows([
            vec!["Email", "Email Status"],
            vec!["a@b.com", "Email sent on 1/1/24 9:00 AM"],
        ]));
        sheet.clear_cell(0, "Email Status");
        assert_eq!(sheet.column("Email Status"), vec![""]);
    }

    #[test]
    fn test_csv_sheet_roundtrip_status_column() {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        tmp.write_all(b"Email;Name\na@b.com;Jo\nbad;X\n").unwrap();

        let mut sheet = CsvSheet::new(tmp.path(), CsvOptions::default());
        let table = sheet.load().unwrap();
        assert_eq!(table.rows.len(), 2);

        sheet
            .write_status_column(2, "Email Status", &["ok".into(), "Error: x.".into()])
            .unwrap();
        let written = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(
            written,
            "Email;Name;Email Status\na@b.com;Jo;ok\nbad;X;Error: x.\n"
        );
    }

    #[test]
    fn test_csv_sheet_error_sidecar() {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        tmp.write_all(b"Email\na@b.com\n").unwrap();
        let mut sheet = CsvSheet::new(tmp.path(), CsvOptions::default());

        sheet.highlight_rows(&[3, 5]).unwrap();
        let errors = std::fs::read_to_string(sheet.errors_path()).unwrap();
        assert_eq!(errors, "3\n5\n");

        sheet.highlight_rows(&[]).unwrap();
        assert!(!sheet.errors_path().exists());
        // Clearing twice is fine.
        sheet.highlight_rows(&[]).unwrap();
    }
}
