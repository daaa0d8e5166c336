//! Decoding of uploaded task sheets into raw rows.
//!
//! Two decoders ship with this module: [`WorkbookSheet`] for spreadsheet
//! files (`.xlsx`, `.xls`, `.ods`) and [`DelimitedSheet`] for the text
//! exports (`.csv`, `.tsv`) every spreadsheet application can produce.
//!
//! Layout: the first row is a header and is skipped. Columns A-D are name,
//! description, deadline and participants; further columns are ignored.

use std::io::Cursor;

use calamine::{Data, DataType, Reader};
use chrono::SubsecRound;

use crate::ingest::{RawRow, format_deadline};

/// Errors that can occur while decoding a sheet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SheetError {
    /// The document is not valid UTF-8 text.
    #[error("sheet is not UTF-8 text")]
    NotText,

    /// A data line is missing the deadline column.
    #[error("line {line}: expected at least 3 columns, found {found}")]
    MissingColumns {
        /// 1-based physical line number.
        line: usize,
        /// Number of columns found.
        found: usize,
    },

    /// The delimited text could not be read.
    #[error("malformed sheet: {0}")]
    Malformed(String),

    /// The spreadsheet file could not be opened.
    #[error("unreadable workbook: {0}")]
    Workbook(String),

    /// The workbook has no worksheet to read.
    #[error("workbook has no worksheets")]
    NoWorksheet,
}

/// Turns uploaded document bytes into raw sheet rows.
pub trait SheetDecoder: Send + Sync {
    /// Decodes every data row of the document, header excluded.
    ///
    /// # Errors
    ///
    /// Returns [`SheetError`] when the document cannot be read as a sheet.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<RawRow>, SheetError>;
}

/// Decoder for comma, semicolon or tab separated text with `"` quoting.
///
/// The delimiter is detected from the header line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedSheet;

impl DelimitedSheet {
    /// Creates a decoder that detects the delimiter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SheetDecoder for DelimitedSheet {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<RawRow>, SheetError> {
        let text = std::str::from_utf8(bytes).map_err(|_| SheetError::NotText)?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let delimiter = detect_delimiter(text.lines().next().unwrap_or_default());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| SheetError::Malformed(e.to_string()))?;
            let line = record
                .position()
                .map_or(0, |p| usize::try_from(p.line()).unwrap_or(usize::MAX));
            push_row(&mut rows, line, record.iter().map(str::to_string).collect())?;
        }
        Ok(rows)
    }
}

fn detect_delimiter(header: &str) -> u8 {
    if header.contains('\t') {
        b'\t'
    } else if header.contains(';') && !header.contains(',') {
        b';'
    } else {
        b','
    }
}

/// Decoder for spreadsheet files. Reads the first worksheet only.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookSheet;

impl WorkbookSheet {
    /// Creates a workbook decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SheetDecoder for WorkbookSheet {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<RawRow>, SheetError> {
        let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| SheetError::Workbook(e.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or(SheetError::NoWorksheet)?
            .map_err(|e| SheetError::Workbook(e.to_string()))?;

        let (Some((header_row, _)), Some((last_row, _))) = (range.start(), range.end()) else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for row in header_row + 1..=last_row {
            let cells = (0..4)
                .map(|col| range.get_value((row, col)).map_or_else(String::new, cell_text))
                .collect();
            let line = usize::try_from(row).map_or(usize::MAX, |r| r + 1);
            push_row(&mut rows, line, cells)?;
        }
        Ok(rows)
    }
}

/// Renders a cell as the text a user would have typed into it. Date cells
/// use the canonical deadline format.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map_or_else(|| cell.to_string(), |dt| format_deadline(dt.round_subsecs(0))),
        other => other.to_string(),
    }
}

/// Appends one data row, skipping blank rows.
fn push_row(rows: &mut Vec<RawRow>, line: usize, cells: Vec<String>) -> Result<(), SheetError> {
    if cells.iter().all(|c| c.trim().is_empty()) {
        return Ok(());
    }
    if cells.len() < 3 {
        return Err(SheetError::MissingColumns {
            line,
            found: cells.len(),
        });
    }
    let mut cells = cells.into_iter();
    rows.push(RawRow {
        name: cells.next().unwrap_or_default(),
        description: cells.next().unwrap_or_default(),
        deadline: cells.next().unwrap_or_default(),
        participants: cells.next().unwrap_or_default(),
    });
    Ok(())
}
