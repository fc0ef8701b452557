//! CSV event tables.
//!
//! Raw event files and snapshots share one format: a header row followed by
//! one numeric row per event. Only the requested columns are kept in memory,
//! stored column-major so the histogram and validation loops can walk one
//! quantity at a time.
//!
//! - **Strict schema**: a missing requested column fails the file (exit code 2)
//! - **Row-level validation**: unparsable or non-finite rows are skipped and reported
//! - **Exact round trip**: values are written in shortest round-trip form

use std::collections::HashMap;
use std::fs::{File, create_dir_all};
use std::path::Path;

use csv::StringRecord;

use crate::error::AppError;

/// Numeric columns of an event file.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    index: HashMap<String, usize>,
}

impl EventTable {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        let columns = vec![Vec::new(); names.len()];
        Self {
            names,
            columns,
            index,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Result<&[f64], AppError> {
        self.index
            .get(name)
            .map(|&i| self.columns[i].as_slice())
            .ok_or_else(|| AppError::new(2, format!("Missing column `{name}` in event table.")))
    }

    /// Append one event; `row` follows the column order of `names()`.
    pub fn push_row(&mut self, row: &[f64]) -> Result<(), AppError> {
        if row.len() != self.columns.len() {
            return Err(AppError::new(
                4,
                format!(
                    "Row has {} values but the table has {} columns.",
                    row.len(),
                    self.columns.len()
                ),
            ));
        }
        for (col, v) in self.columns.iter_mut().zip(row) {
            col.push(*v);
        }
        Ok(())
    }
}

/// A row that was skipped while reading.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Read output: table plus row diagnostics.
#[derive(Debug, Clone)]
pub struct TableRead {
    pub table: EventTable,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Read the `required` columns of a CSV event file.
pub fn read_table(path: &Path, required: &[String]) -> Result<TableRead, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open event file '{}': {e}", path.display()))
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| {
            AppError::new(2, format!("Failed to read header of '{}': {e}", path.display()))
        })?
        .clone();
    let header_map = build_header_map(&headers);

    let positions = required
        .iter()
        .map(|name| {
            header_map.get(name.as_str()).copied().ok_or_else(|| {
                AppError::new(
                    2,
                    format!("Missing required column `{name}` in '{}'.", path.display()),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut table = EventTable::new(required.to_vec());
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut values = vec![0.0; positions.len()];

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &positions, required, &mut values) {
            Ok(()) => table.push_row(&values)?,
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    Ok(TableRead {
        table,
        row_errors,
        rows_read,
    })
}

/// Write a table as CSV, creating parent directories.
pub fn write_table(path: &Path, table: &EventTable) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).map_err(|e| {
            AppError::new(2, format!("Failed to create directory '{}': {e}", parent.display()))
        })?;
    }
    let write_err =
        |e: csv::Error| AppError::new(2, format!("Failed to write '{}': {e}", path.display()));

    let mut writer = csv::Writer::from_path(path).map_err(write_err)?;
    writer.write_record(table.names()).map_err(write_err)?;

    let mut row = Vec::with_capacity(table.columns.len());
    for i in 0..table.len() {
        row.clear();
        row.extend(table.columns.iter().map(|c| c[i].to_string()));
        writer.write_record(&row).map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_string()
}

fn parse_row(
    record: &StringRecord,
    positions: &[usize],
    names: &[String],
    out: &mut [f64],
) -> Result<(), String> {
    for ((slot, &pos), name) in out.iter_mut().zip(positions).zip(names) {
        let raw = record
            .get(pos)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("Missing value: `{name}`"))?;
        let v = raw
            .parse::<f64>()
            .map_err(|_| format!("Invalid number for `{name}`: '{raw}'"))?;
        if !v.is_finite() {
            return Err(format!("Non-finite value for `{name}`"));
        }
        *slot = v;
    }
    Ok(())
}
