use crate::campaign::CampaignKey;
use crate::config::{ColumnMapping, InputConfig};
use csv::{ReaderBuilder, StringRecord};
use std::fs;
use std::io;
use std::path::PathBuf;

const DELIMITER_CANDIDATES: [u8; 3] = [b',', b';', b'\t'];

/// One registration row that carries enough data to deliver a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub line: u64,
    pub name: String,
    /// `None` when the cell is blank; reported as a skip, not an error.
    pub email: Option<String>,
    pub title: Option<String>,
    pub authors: Option<String>,
}

impl Recipient {
    pub fn campaign_key(&self) -> CampaignKey {
        CampaignKey::new(&self.name, self.title.as_deref())
    }
}

/// A row that cannot be turned into a [`Recipient`]. Skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("line {line}: required column '{column}' is blank")]
    MissingField { line: u64, column: String },
    #[error("line {line}: unreadable row: {reason}")]
    Unreadable { line: u64, reason: String },
}

pub type RowResult = Result<Recipient, RowError>;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("cannot read input file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot parse input header: {0}")]
    Header(#[from] csv::Error),
    #[error("column '{column}' not found in header (available: {available})")]
    MissingColumn { column: String, available: String },
}

struct ColumnIndexes {
    name: usize,
    email: usize,
    title: Option<usize>,
    authors: Option<usize>,
}

impl ColumnIndexes {
    fn resolve(headers: &StringRecord, mapping: &ColumnMapping) -> Result<Self, InputError> {
        let find = |column: &str| {
            find_column(headers, column).ok_or_else(|| InputError::MissingColumn {
                column: column.to_string(),
                available: headers.iter().map(clean_cell).collect::<Vec<_>>().join(", "),
            })
        };
        Ok(Self {
            name: find(&mapping.name)?,
            email: find(&mapping.email)?,
            title: mapping.title.as_deref().map(find).transpose()?,
            authors: mapping.authors.as_deref().map(find).transpose()?,
        })
    }
}

pub fn read_recipients(config: &InputConfig) -> Result<Vec<RowResult>, InputError> {
    let content = fs::read_to_string(&config.path).map_err(|source| InputError::Io {
        path: config.path.clone(),
        source,
    })?;
    let rows = parse_recipients(&content, config.delimiter, &config.columns)?;
    log::info!("Read {} rows from {}", rows.len(), config.path.display());
    Ok(rows)
}

/// Parse CSV text. The delimiter is sniffed from the header when `None`.
pub fn parse_recipients(
    content: &str,
    delimiter: Option<char>,
    columns: &ColumnMapping,
) -> Result<Vec<RowResult>, InputError> {
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = delimiter
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or_else(|| sniff_delimiter(content, columns));

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();
    let indexes = ColumnIndexes::resolve(&headers, columns)?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let fallback_line = i as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                rows.push(Err(RowError::Unreadable {
                    line,
                    reason: e.to_string(),
                }));
                continue;
            }
        };
        if record.iter().all(|cell| clean_cell(cell).is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(fallback_line);
        rows.push(recipient_from(&record, line, &indexes, columns));
    }
    Ok(rows)
}

fn recipient_from(
    record: &StringRecord,
    line: u64,
    indexes: &ColumnIndexes,
    columns: &ColumnMapping,
) -> RowResult {
    let cell = |index: usize| record.get(index).map(clean_cell).unwrap_or_default();
    let required = |index: usize, column: &str| {
        let value = cell(index);
        if value.is_empty() {
            Err(RowError::MissingField {
                line,
                column: column.to_string(),
            })
        } else {
            Ok(value)
        }
    };

    let name = required(indexes.name, &columns.name)?;
    let title = match (indexes.title, columns.title.as_deref()) {
        (Some(index), Some(column)) => Some(required(index, column)?),
        _ => None,
    };
    let email = Some(cell(indexes.email)).filter(|email| !email.is_empty());
    let authors = indexes.authors.map(cell);

    Ok(Recipient {
        line,
        name,
        email,
        title,
        authors,
    })
}

fn sniff_delimiter(content: &str, columns: &ColumnMapping) -> u8 {
    let header_line = content.lines().next().unwrap_or_default();
    let wanted: Vec<&str> = [Some(columns.name.as_str()), Some(columns.email.as_str())]
        .into_iter()
        .chain([columns.title.as_deref(), columns.authors.as_deref()])
        .flatten()
        .collect();

    for candidate in DELIMITER_CANDIDATES {
        let mut reader = ReaderBuilder::new()
            .delimiter(candidate)
            .has_headers(false)
            .flexible(true)
            .from_reader(header_line.as_bytes());
        let Some(Ok(headers)) = reader.records().next() else {
            continue;
        };
        if wanted
            .iter()
            .all(|column| find_column(&headers, column).is_some())
        {
            log::debug!("Detected input delimiter {:?}", candidate as char);
            return candidate;
        }
    }

    log::warn!("Could not detect the input delimiter, defaulting to ','");
    b','
}

fn find_column(headers: &StringRecord, column: &str) -> Option<usize> {
    let wanted = column.trim().to_lowercase();
    headers
        .iter()
        .position(|header| clean_cell(header).to_lowercase() == wanted)
}

/// Trim and drop stray quotes left by spreadsheet exports.
fn clean_cell(cell: &str) -> String {
    cell.trim().trim_matches('"').trim().to_string()
}
