//! Flat posting rows and the sheet sinks they are written to.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::directory::DirectoryEntry;
use crate::lifecycle::{LifecycleDates, LifecycleField};
use crate::persist::write_json_atomic;

/// Summary field stamped with the date of the last successful run.
pub const LAST_RUN_FIELD: &str = "Last API Automation";
const STAMP_FORMAT: &str = "%m/%d/%y";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sink document at {} is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("'{0}' is not a posting column")]
    UnknownKeyField(String),
}

/// One employee's row, keyed by sheet column title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "HRIS Original Hire")]
    pub original_hire: String,
    #[serde(rename = "HRIS Original Termination")]
    pub original_termination: String,
    #[serde(rename = "HRIS Rehire")]
    pub rehire: String,
    #[serde(rename = "HRIS Retermination")]
    pub retermination: String,
    #[serde(rename = "HRIS Final Hire")]
    pub final_hire: String,
    #[serde(rename = "HRIS Final Termination")]
    pub final_termination: String,
    #[serde(rename = "Sage Id")]
    pub sage_id: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Job Title")]
    pub job_title: String,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Division")]
    pub division: String,
    #[serde(rename = "Work Email")]
    pub work_email: String,
}

impl PostingRow {
    pub const COLUMNS: [&'static str; 14] = [
        "Name",
        "Id",
        "HRIS Original Hire",
        "HRIS Original Termination",
        "HRIS Rehire",
        "HRIS Retermination",
        "HRIS Final Hire",
        "HRIS Final Termination",
        "Sage Id",
        "Location",
        "Job Title",
        "Department",
        "Division",
        "Work Email",
    ];

    /// Assembles a row from directory attributes and derived dates. Missing
    /// values become empty strings.
    pub fn assemble(
        employee_id: &str,
        entry: Option<&DirectoryEntry>,
        dates: &LifecycleDates,
        sage_id: Option<String>,
    ) -> Self {
        let mut row = Self {
            name: entry.map(DirectoryEntry::full_name).unwrap_or_default(),
            id: employee_id.to_string(),
            sage_id: sage_id.unwrap_or_default(),
            location: entry.and_then(|e| e.location.clone()).unwrap_or_default(),
            job_title: entry.and_then(|e| e.job_title.clone()).unwrap_or_default(),
            department: entry.and_then(|e| e.department.clone()).unwrap_or_default(),
            division: entry.and_then(|e| e.division.clone()).unwrap_or_default(),
            work_email: entry.and_then(|e| e.work_email.clone()).unwrap_or_default(),
            ..Self::default()
        };
        for field in LifecycleField::ALL {
            *row.lifecycle_mut(field) = dates.rendered(field);
        }
        row
    }

    /// Rendered date posted under `field.column()`.
    pub fn lifecycle(&self, field: LifecycleField) -> &str {
        match field {
            LifecycleField::OriginalHire => &self.original_hire,
            LifecycleField::Termination1 => &self.original_termination,
            LifecycleField::Rehire1 => &self.rehire,
            LifecycleField::Termination2 => &self.retermination,
            LifecycleField::Rehire2 => &self.final_hire,
            LifecycleField::Termination3 => &self.final_termination,
        }
    }

    fn lifecycle_mut(&mut self, field: LifecycleField) -> &mut String {
        match field {
            LifecycleField::OriginalHire => &mut self.original_hire,
            LifecycleField::Termination1 => &mut self.original_termination,
            LifecycleField::Rehire1 => &mut self.rehire,
            LifecycleField::Termination2 => &mut self.retermination,
            LifecycleField::Rehire2 => &mut self.final_hire,
            LifecycleField::Termination3 => &mut self.final_termination,
        }
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        if let Some(field) = LifecycleField::ALL
            .into_iter()
            .find(|field| field.column() == column)
        {
            return Some(self.lifecycle(field));
        }
        let value = match column {
            "Name" => &self.name,
            "Id" => &self.id,
            "Sage Id" => &self.sage_id,
            "Location" => &self.location,
            "Job Title" => &self.job_title,
            "Department" => &self.department,
            "Division" => &self.division,
            "Work Email" => &self.work_email,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn is_column(column: &str) -> bool {
        Self::COLUMNS.contains(&column)
    }

    fn cells(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        Self::COLUMNS
            .into_iter()
            .filter_map(move |column| self.field(column).map(|value| (column, value)))
    }
}

/// Destination sheet for posting rows.
pub trait RowSink {
    /// Replaces every existing row with `rows`.
    fn post_fresh(&mut self, rows: &[PostingRow]) -> Result<(), SinkError>;

    /// Overwrites the posting columns of existing rows whose `key_field`
    /// matches an incoming row. Returns how many rows changed.
    fn update_rows(&mut self, rows: &[PostingRow], key_field: &str) -> Result<usize, SinkError>;

    /// Records `date` in the last-run summary field.
    fn stamp_last_run(&mut self, date: NaiveDate) -> Result<(), SinkError>;
}

type SheetRow = BTreeMap<String, String>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SheetDocument {
    #[serde(default)]
    summary: BTreeMap<String, String>,
    #[serde(default)]
    rows: Vec<SheetRow>,
}

/// Sheet kept as a local JSON document. Columns the sync does not own are
/// left untouched by `update_rows`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SheetDocument, SinkError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(SheetDocument::default()),
            Err(source) => {
                return Err(SinkError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(SheetDocument::default());
        }
        serde_json::from_str(&raw).map_err(|e| SinkError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn save(&self, document: &SheetDocument) -> Result<(), SinkError> {
        write_json_atomic(&self.path, document).map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn to_sheet_row(row: &PostingRow) -> SheetRow {
    row.cells()
        .map(|(column, value)| (column.to_string(), value.to_string()))
        .collect()
}

impl RowSink for JsonFileSink {
    fn post_fresh(&mut self, rows: &[PostingRow]) -> Result<(), SinkError> {
        let mut document = self.load()?;
        let removed = document.rows.len();
        document.rows = rows.iter().map(to_sheet_row).collect();
        self.save(&document)?;
        info!(
            sheet = %self.path.display(),
            removed,
            posted = rows.len(),
            "rows posted fresh"
        );
        Ok(())
    }

    fn update_rows(&mut self, rows: &[PostingRow], key_field: &str) -> Result<usize, SinkError> {
        if !PostingRow::is_column(key_field) {
            return Err(SinkError::UnknownKeyField(key_field.to_string()));
        }
        let incoming: BTreeMap<&str, &PostingRow> = rows
            .iter()
            .filter_map(|row| row.field(key_field).map(|key| (key, row)))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        let mut document = self.load()?;
        let mut updated = 0;
        for existing in &mut document.rows {
            let Some(row) = existing
                .get(key_field)
                .and_then(|key| incoming.get(key.as_str()))
            else {
                continue;
            };
            for (column, value) in row.cells() {
                existing.insert(column.to_string(), value.to_string());
            }
            updated += 1;
        }
        self.save(&document)?;
        info!(
            sheet = %self.path.display(),
            key = key_field,
            updated,
            "rows updated"
        );
        Ok(updated)
    }

    fn stamp_last_run(&mut self, date: NaiveDate) -> Result<(), SinkError> {
        let mut document = self.load()?;
        document.summary.insert(
            LAST_RUN_FIELD.to_string(),
            date.format(STAMP_FORMAT).to_string(),
        );
        self.save(&document)
    }
}
