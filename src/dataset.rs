//! Read-only in-memory table loaded once from a CSV file.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::error::DatasetError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
}

impl ColumnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Text => "text",
        }
    }
}

#[derive(Debug)]
pub struct Dataset {
    columns: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
        let dataset = Self::from_reader(file)?;
        info!(path = %path.display(), rows = dataset.len(), columns = dataset.columns.len(), "Loaded dataset");
        Ok(dataset)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, DatasetError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if columns.is_empty() || columns.iter().all(String::is_empty) {
            return Err(DatasetError::Empty);
        }

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            // Short rows are padded so every row has one cell per column.
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        let kinds = (0..columns.len())
            .map(|col| {
                let mut cells = rows.iter().map(|row| row[col].as_str()).filter(|c| !c.is_empty()).peekable();
                if cells.peek().is_some() && cells.all(|c| parse_number(c).is_some()) {
                    ColumnKind::Numeric
                } else {
                    ColumnKind::Text
                }
            })
            .collect();

        Ok(Self { columns, kinds, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Exact match first, then case-insensitive.
    pub fn column_index(&self, name: &str) -> Result<usize, DatasetError> {
        let name = name.trim();
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
            .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))
    }

    pub fn column_name(&self, col: usize) -> &str {
        &self.columns[col]
    }

    pub fn column_kind(&self, col: usize) -> ColumnKind {
        self.kinds[col]
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        &self.rows[row][col]
    }

    pub fn numeric(&self, row: usize, col: usize) -> Option<f64> {
        parse_number(self.cell(row, col))
    }

    /// Column names, kinds and the first `sample_rows` rows, for prompting.
    pub fn schema_summary(&self, sample_rows: usize) -> String {
        let mut out = format!("The table has {} rows and these columns:\n", self.len());
        for (name, kind) in self.columns.iter().zip(&self.kinds) {
            let _ = writeln!(out, "- \"{}\" ({})", name, kind.as_str());
        }
        if sample_rows > 0 && !self.rows.is_empty() {
            out.push_str("Sample rows:\n");
            for row in self.rows.iter().take(sample_rows) {
                let _ = writeln!(out, "{}", row.join(" | "));
            }
        }
        out
    }
}

/// Parses a cell as a number, tolerating thousands separators.
pub fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>()
        .ok()
        .or_else(|| cell.replace(',', "").parse::<f64>().ok())
        .filter(|n| n.is_finite())
}
