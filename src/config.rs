//! Merge settings carried in the template file.
//!
//! Every field has a default, so a template that only declares `subject` and
//! `body` runs against a sheet with `Email`, `DocLink` and `Email Status`
//! columns and `[[Header]]` placeholders.

use serde::{Deserialize, Serialize};

use crate::MergeError;

/// Header names of the reserved columns. Matched case-insensitively after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    /// Recipient address column. Required.
    pub email: String,
    /// Optional document-reference column used for attachments.
    pub attachment: String,
    /// Status ledger column. Created as a trailing column when absent.
    pub status: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            email: "Email".to_string(),
            attachment: "DocLink".to_string(),
            status: "Email Status".to_string(),
        }
    }
}

/// Placeholder delimiter pair, e.g. `[[` and `]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "[[".to_string(),
            close: "]]".to_string(),
        }
    }
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.open.is_empty() || self.close.is_empty() {
            return Err(MergeError::InvalidDelimiters {
                open: self.open.clone(),
                close: self.close.clone(),
            });
        }
        Ok(())
    }

    /// Spell the token for `name`, e.g. `[[Name]]`.
    pub fn token(&self, name: &str) -> String {
        format!("{}{}{}", self.open, name, self.close)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub columns: ColumnNames,
    pub delimiters: Delimiters,
    /// Joins carried attachment errors and the final status text.
    pub status_separator: String,
    /// Overwrite the status of skipped rows with the `Skipped: ...` message.
    /// When false the previous text is written back unchanged.
    pub annotate_skipped: bool,
    /// Ask the sheet to flag failed rows.
    pub highlight_errors: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            delimiters: Delimiters::default(),
            status_separator: " | ".to_string(),
            annotate_skipped: true,
            highlight_errors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_sheet_conventions() {
        let cfg = MergeConfig::default();
        assert_eq!(cfg.columns.email, "Email");
        assert_eq!(cfg.columns.attachment, "DocLink");
        assert_eq!(cfg.columns.status, "Email Status");
        assert_eq!(cfg.delimiters.token("Name"), "[[Name]]");
        assert_eq!(cfg.status_separator, " | ");
        assert!(cfg.annotate_skipped);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg: MergeConfig =
            serde_yaml::from_str("delimiters:\n  open: '{{'\n  close: '}}'\n").unwrap();
        assert_eq!(cfg.delimiters.token("Name"), "{{Name}}");
        assert_eq!(cfg.columns, ColumnNames::default());
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        let d = Delimiters::new("", "]]");
        assert!(matches!(
            d.validate(),
            Err(MergeError::InvalidDelimiters { .. })
        ));
    }

    #[test]
    fn test_identical_delimiters_allowed() {
        let d = Delimiters::new("%%", "%%");
        assert!(d.validate().is_ok());
        assert_eq!(d.token("Name"), "%%Name%%");
    }
}
