use crate::config::ColumnNames;
use crate::data::header_matches;
use crate::MergeError;

/// Column positions of the reserved headers, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Headers as the row loop sees them, including a status header that
    /// will be created on write-back.
    pub headers: Vec<String>,
    pub email: usize,
    pub attachment: Option<usize>,
    pub status: usize,
    /// True when the status column is not in the sheet yet.
    pub status_created: bool,
}

impl Schema {
    pub fn resolve(headers: &[String], columns: &ColumnNames) -> crate::Result<Self> {
        let find = |wanted: &str| headers.iter().position(|h| header_matches(h, wanted));

        let email = find(&columns.email).ok_or_else(|| MergeError::MissingIdentifierColumn {
            header: columns.email.clone(),
        })?;
        let attachment = find(&columns.attachment);

        let mut headers = headers.to_vec();
        let (status, status_created) = match find(&columns.status) {
            Some(idx) => (idx, false),
            None => {
                headers.push(columns.status.clone());
                (headers.len() - 1, true)
            }
        };

        Ok(Self {
            headers,
            email,
            attachment,
            status,
            status_created,
        })
    }

    pub fn status_header(&self) -> &str {
        &self.headers[self.status]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_existing_columns() {
        let schema = Schema::resolve(
            &headers(&["Name", " email ", "doclink", "EMAIL STATUS"]),
            &ColumnNames::default(),
        )
        .unwrap();
        assert_eq!(schema.email, 1);
        assert_eq!(schema.attachment, Some(2));
        assert_eq!(schema.status, 3);
        assert!(!schema.status_created);
        assert_eq!(schema.headers.len(), 4);
        assert_eq!(schema.status_header(), "EMAIL STATUS");
    }

    #[test]
    fn test_missing_status_column_is_appended() {
        let schema =
            Schema::resolve(&headers(&["Email", "Name"]), &ColumnNames::default()).unwrap();
        assert_eq!(schema.status, 2);
        assert!(schema.status_created);
        assert_eq!(schema.headers, headers(&["Email", "Name", "Email Status"]));
        assert_eq!(schema.attachment, None);
    }

    #[test]
    fn test_missing_email_column_is_precondition_error() {
        let err = Schema::resolve(&headers(&["Name"]), &ColumnNames::default()).unwrap_err();
        assert!(err.is_precondition());
        assert!(matches!(err, MergeError::MissingIdentifierColumn { header } if header == "Email"));
    }

    #[test]
    fn test_custom_column_names() {
        let columns = ColumnNames {
            email: "Recipient".into(),
            attachment: "Contract".into(),
            status: "Sent".into(),
        };
        let schema =
            Schema::resolve(&headers(&["Sent", "Contract", "Recipient"]), &columns).unwrap();
        assert_eq!((schema.email, schema.attachment, schema.status), (2, Some(1), 0));
    }
}
