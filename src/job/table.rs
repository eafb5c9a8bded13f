//! CSV tables of sample points and their outcomes.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use tracing::info;

use super::outcome::PROCESS_STATUS;

pub const PID: &str = "PID";
pub const LON: &str = "Lon";
pub const LAT: &str = "Lat";

const BOM: &str = "\u{feff}";

pub type Row = IndexMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path:?}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to parse {path:?}: {error}")]
    Parse { path: PathBuf, error: csv::Error },
    #[error("required column {column} not found in {path:?}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("failed to encode table: {0}")]
    Encode(#[from] csv::Error),
    #[error("failed to write {path:?}: {error}")]
    Write {
        path: PathBuf,
        error: std::io::Error,
    },
}

/// One input record.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    pub pid: String,
    pub lon: f64,
    pub lat: f64,
}

fn coordinate(row: &Row, column: &str) -> f64 {
    row.get(column)
        .and_then(|cell| cell.trim().parse().ok())
        .unwrap_or(f64::NAN)
}

impl SamplePoint {
    /// Unparsable coordinates become NaN so that conversion fails for this
    /// point alone.
    pub fn from_row(row: &Row) -> Self {
        Self {
            pid: row.get(PID).cloned().unwrap_or_default(),
            lon: coordinate(row, LON),
            lat: coordinate(row, LAT),
        }
    }
}

/// Header-ordered CSV table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(path: impl Into<PathBuf>, headers: Vec<String>) -> Self {
        Self {
            path: path.into(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self, Error> {
        let path = path.into();
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|error| Error::Parse {
                path: path.clone(),
                error,
            })?
            .iter()
            .enumerate()
            .map(|(index, header)| {
                let header = if index == 0 {
                    header.trim_start_matches(BOM)
                } else {
                    header
                };
                header.trim().to_owned()
            })
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|error| Error::Parse {
                path: path.clone(),
                error,
            })?;
            rows.push(
                headers
                    .iter()
                    .enumerate()
                    .map(|(index, header)| {
                        (header.clone(), record.get(index).unwrap_or_default().to_owned())
                    })
                    .collect(),
            );
        }
        Ok(Self {
            path,
            headers,
            rows,
        })
    }

    pub async fn read(path: &Path) -> Result<Self, Error> {
        let data = tokio::fs::read(path).await.map_err(|error| Error::Read {
            path: path.to_owned(),
            error,
        })?;
        let table = Self::parse(path, &data)?;
        info!(?path, rows = table.len(), "read table");
        Ok(table)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|header| header == column)
    }

    pub fn require_columns(&self, columns: &[&str]) -> Result<(), Error> {
        match columns.iter().find(|column| !self.has_column(column)) {
            Some(column) => Err(Error::MissingColumn {
                path: self.path.clone(),
                column: (*column).to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// Ids of all rows, `None` when there is no `PID` column.
    pub fn pids(&self) -> Option<BTreeSet<String>> {
        self.has_column(PID).then(|| {
            self.rows
                .iter()
                .filter_map(|row| row.get(PID).map(|pid| pid.trim().to_owned()))
                .collect()
        })
    }

    /// Append a row; columns unknown so far are added after the existing ones.
    pub fn push(&mut self, row: Row) {
        for column in row.keys() {
            if !self.has_column(column) {
                self.headers.push(column.clone());
            }
        }
        self.rows.push(row);
    }

    /// Number of rows per `process_status`, most frequent first.
    pub fn status_counts(&self) -> IndexMap<String, usize> {
        let mut counts = IndexMap::<String, usize>::new();
        for status in self.rows.iter().filter_map(|row| row.get(PROCESS_STATUS)) {
            *counts.entry(status.clone()).or_default() += 1;
        }
        counts.sort_by(|_, a, _, b| b.cmp(a));
        counts
    }

    /// Encode as CSV, prefixed with a UTF-8 byte order mark.
    pub fn to_csv(&self) -> Result<Vec<u8>, Error> {
        let mut writer = csv::Writer::from_writer(BOM.as_bytes().to_vec());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(
                self.headers
                    .iter()
                    .map(|header| row.get(header).map(String::as_str).unwrap_or_default()),
            )?;
        }
        writer
            .into_inner()
            .map_err(|error| Error::Encode(error.into_error().into()))
    }

    /// Replace `path` with this table. The data goes to a sibling temporary
    /// file first so a crash never leaves a truncated table behind.
    pub async fn write(&self, path: &Path) -> Result<(), Error> {
        let data = self.to_csv()?;
        let write_error = |error| Error::Write {
            path: path.to_owned(),
            error,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let mut temporary = path.as_os_str().to_owned();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);
        tokio::fs::write(&temporary, data).await.map_err(write_error)?;
        tokio::fs::rename(&temporary, path)
            .await
            .map_err(write_error)?;
        info!(?path, rows = self.len(), "saved table");
        Ok(())
    }
}
