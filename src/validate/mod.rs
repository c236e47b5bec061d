use std::sync::LazyLock;

use regex::Regex;

use crate::data::{Schema, Table};

pub const INVALID_EMAIL_REASON: &str = "Invalid or missing email address";

/// local-part@domain, where the domain is a bracketed IPv4 literal or dotted
/// labels ending in a label of two or more letters.
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#,
    )
    .expect("address pattern is valid")
});

/// Admissibility of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Syntax-only address check. No DNS or network lookups.
pub fn is_valid_address(address: &str) -> bool {
    ADDRESS.is_match(address.trim())
}

/// The recipient cell of `row`, read from the resolved address column.
///
/// Cells are looked up by index, so a second column with the same header
/// never stands in for the address.
pub fn recipient<'a>(table: &'a Table, schema: &Schema, row: usize) -> &'a str {
    table.cell(row, schema.email).trim()
}

/// Check that the row's recipient address is present and well formed.
///
/// A missing attachment column is not a failure; it only disables attachments.
pub fn validate_row(address: &str) -> ValidationOutcome {
    let address = address.trim();
    if address.is_empty() || !is_valid_address(address) {
        return ValidationOutcome::invalid(INVALID_EMAIL_REASON);
    }
    ValidationOutcome::valid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnNames;

    fn schema(headers: &[&str]) -> Schema {
        let headers: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        Schema::resolve(&headers, &ColumnNames::default()).unwrap()
    }

    #[test]
    fn test_valid_addresses() {
        for addr in [
            "a@b.com",
            "first.last@example.co.uk",
            "user+tag@sub.example.org",
            "x@[192.168.0.1]",
            "\"quoted name\"@example.com",
            "  padded@example.com  ",
        ] {
            assert!(is_valid_address(addr), "{addr} should be valid");
        }
    }

    #[test]
    fn test_invalid_addresses() {
        for addr in [
            "",
            "bad",
            "a@b",
            "a@b.c",
            "a@b.c0m",
            "two@@example.com",
            ".lead@example.com",
            "trail.@example.com",
            "a..b@example.com",
            "sp ace@example.com",
            "Jo <jo@example.com>",
        ] {
            assert!(!is_valid_address(addr), "{addr} should be invalid");
        }
    }

    #[test]
    fn test_validate_row_ok() {
        assert_eq!(validate_row(" jo@example.com"), ValidationOutcome::valid());
    }

    #[test]
    fn test_validate_row_empty_and_malformed() {
        for value in ["", "   ", "bad"] {
            let outcome = validate_row(value);
            assert!(!outcome.ok);
            assert_eq!(outcome.reason.as_deref(), Some(INVALID_EMAIL_REASON));
        }
    }

    #[test]
    fn test_recipient_uses_resolved_column() {
        let table = Table::from_rows([
            vec!["Name", "EMAIL", "Email"],
            vec!["Jo", " jo@example.com ", "bad"],
        ]);
        let s = schema(&["Name", "EMAIL", "Email"]);
        assert_eq!(s.email, 1);
        assert_eq!(recipient(&table, &s, 0), "jo@example.com");
        assert!(validate_row(recipient(&table, &s, 0)).ok);
    }

    #[test]
    fn test_missing_attachment_column_is_not_a_failure() {
        let table = Table::from_rows([vec!["Email"], vec!["a@b.com"]]);
        let s = schema(&["Email"]);
        assert!(s.attachment.is_none());
        assert!(validate_row(recipient(&table, &s, 0)).ok);
    }
}
