pub mod csv;
pub mod schema;
pub mod sheet;

pub use schema::Schema;
pub use sheet::{CsvSheet, MemorySheet, Sheet};

/// Header row plus data rows, every cell as display text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Build a table from string literals, first row being the header row.
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut iter = rows
            .into_iter()
            .map(|r| r.into_iter().map(Into::into).collect::<Vec<String>>());
        let headers = iter.next().unwrap_or_default();
        Self {
            headers,
            rows: iter.collect(),
        }
    }

    pub fn data_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell text, empty for cells past the end of a short row.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Field map for the zero-based data row `row` over `headers`.
    ///
    /// `headers` may be longer than the stored header row (a status column
    /// that does not exist yet); missing cells read as empty.
    pub fn field_map(&self, headers: &[String], row: usize) -> FieldMap {
        FieldMap(
            headers
                .iter()
                .enumerate()
                .map(|(col, h)| (h.clone(), self.cell(row, col).to_string()))
                .collect(),
        )
    }
}

/// Ordered `(header, value)` pairs for one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMap(Vec<(String, String)>);

impl FieldMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, header: impl Into<String>, value: impl Into<String>) {
        let header = header.into();
        let value = value.into();
        match self.0.iter_mut().find(|(h, _)| *h == header) {
            Some(slot) => slot.1 = value,
            None => self.0.push((header, value)),
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Case-insensitive, whitespace-trimmed header comparison used for reserved columns.
pub(crate) fn header_matches(header: &str, wanted: &str) -> bool {
    header.trim().eq_ignore_ascii_case(wanted.trim())
}
