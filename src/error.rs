use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML parse error in {path}: {source}")]
    TemplateParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("CSV parse error in {path}: {source}")]
    CsvParse { path: PathBuf, source: csv::Error },

    #[error("CSV file has no headers: {path}")]
    CsvNoHeaders { path: PathBuf },

    #[error("profile JSON error in {path}: {source}")]
    ProfileJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("the sheet has no data rows")]
    NoDataRows,

    #[error("no '{header}' column found in the header row")]
    MissingIdentifierColumn { header: String },

    #[error("both subject and body templates are empty")]
    EmptyTemplate,

    #[error("invalid placeholder delimiters '{open}' / '{close}': both must be non-empty")]
    InvalidDelimiters { open: String, close: String },

    #[error("cannot build placeholder pattern: {reason}")]
    PlaceholderPattern { reason: String },

    #[error("CSS inlining error: {reason}")]
    CssInline { reason: String },

    #[error("stylesheet file not found: {path}")]
    StylesheetNotFound { path: PathBuf },

    #[error("document conversion failed for '{document_id}': {reason}")]
    Conversion { document_id: String, reason: String },

    #[error("SMTP connection error: {reason}")]
    SmtpConnect { reason: String },

    #[error("SMTP send error for {recipient}: {reason}")]
    SmtpSend { recipient: String, reason: String },

    #[error("keyring error: {reason}")]
    Keyring { reason: String },

    #[error("merge run is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl MergeError {
    /// Errors that abort a run before any row is touched and leave no trace in the sheet.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            MergeError::NoDataRows
                | MergeError::MissingIdentifierColumn { .. }
                | MergeError::EmptyTemplate
                | MergeError::InvalidDelimiters { .. }
        )
    }
}
