use std::path::Path;

use encoding_rs::Encoding;

use crate::data::Table;
use crate::MergeError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Default)]
pub struct CsvOptions {
    pub separator: Option<u8>,
    pub encoding: Option<String>,
}

/// How a CSV file is laid out on disk, so a rewrite can reproduce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvFormat {
    pub separator: u8,
    pub encoding: &'static Encoding,
    /// The file started with a UTF-8 byte order mark.
    pub bom: bool,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            separator: b',',
            encoding: encoding_rs::UTF_8,
            bom: false,
        }
    }
}

/// A CSV file's contents along with the format it was read in.
#[derive(Debug, Clone)]
pub struct LoadedCsv {
    pub table: Table,
    pub format: CsvFormat,
}

pub fn detect_separator(first_line: &str) -> u8 {
    let candidates: &[(u8, char)] = &[(b',', ','), (b';', ';'), (b'|', '|'), (b'\t', '\t')];
    candidates
        .iter()
        .max_by_key(|(_, ch)| first_line.chars().filter(|c| c == ch).count())
        .map(|(byte, _)| *byte)
        .unwrap_or(b',')
}

/// Decode `bytes` with the labelled encoding, or as UTF-8 falling back to
/// Windows-1252. Returns the text and the encoding actually used.
pub fn decode_bytes(bytes: &[u8], hint: Option<&str>) -> (String, &'static Encoding) {
    if let Some(label) = hint {
        let encoding =
            Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::WINDOWS_1252);
        let (decoded, used, _) = encoding.decode(bytes);
        return (decoded.into_owned(), used);
    }

    match String::from_utf8(bytes.to_vec()) {
        Ok(s) => (s, encoding_rs::UTF_8),
        Err(_) => {
            let (decoded, used, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            (decoded.into_owned(), used)
        }
    }
}

pub fn load_csv(path: &Path, opts: &CsvOptions) -> crate::Result<LoadedCsv> {
    let bytes = std::fs::read(path).map_err(|source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (content, encoding) = decode_bytes(&bytes, opts.encoding.as_deref());
    let bom = encoding == encoding_rs::UTF_8 && bytes.starts_with(UTF8_BOM);
    // A UTF-8 BOM would otherwise stick to the first header.
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let separator = if let Some(sep) = opts.separator {
        sep
    } else {
        let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        detect_separator(first_line)
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = {
        let h = reader.headers().map_err(|source| MergeError::CsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        if h.is_empty() {
            return Err(MergeError::CsvNoHeaders {
                path: path.to_path_buf(),
            });
        }
        h.iter().map(String::from).collect()
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|source| MergeError::CsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        rows.push(record.iter().map(String::from).collect());
    }

    Ok(LoadedCsv {
        table: Table::new(headers, rows),
        format: CsvFormat {
            separator,
            encoding,
            bom,
        },
    })
}

/// Write `table` to `path` in `format`, replacing the file atomically.
///
/// Blank lines in the original are not reproduced, so after a rewrite data
/// row `n` sits on line `n + 1` of the file. Characters the target encoding
/// cannot represent are written as numeric character references.
pub fn save_csv(path: &Path, table: &Table, format: CsvFormat) -> crate::Result<()> {
    let tmp_path = path.with_extension("csv.tmp");
    let csv_err = |source| MergeError::CsvParse {
        path: tmp_path.clone(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.separator)
        .flexible(true)
        .from_writer(Vec::new());

    let width = table.headers.len();
    writer.write_record(&table.headers).map_err(csv_err)?;
    for row in &table.rows {
        let mut record: Vec<&str> = row.iter().map(String::as_str).collect();
        if record.len() < width {
            record.resize(width, "");
        }
        writer.write_record(&record).map_err(csv_err)?;
    }
    let buffer = writer.into_inner().map_err(|e| MergeError::Io {
        path: tmp_path.clone(),
        source: std::io::Error::other(e.to_string()),
    })?;

    let text = String::from_utf8_lossy(&buffer);
    let (encoded, _, unmappable) = format.encoding.encode(&text);
    if unmappable {
        tracing::warn!(
            path = %path.display(),
            encoding = format.encoding.name(),
            "some characters cannot be represented in the sheet's encoding"
        );
    }
    let mut bytes = Vec::with_capacity(encoded.len() + UTF8_BOM.len());
    if format.bom {
        bytes.extend_from_slice(UTF8_BOM);
    }
    bytes.extend_from_slice(&encoded);

    std::fs::write(&tmp_path, bytes).map_err(|source| MergeError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    })
}
