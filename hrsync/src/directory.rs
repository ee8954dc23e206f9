//! Employee directory collaborator. The reconstructor only needs the
//! original-hire fallback; roster assembly also reads identity and contact
//! fields from here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::lifecycle::EventDate;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("employee {employee_id} has an invalid original hire date '{value}'")]
    InvalidDate { employee_id: String, value: String },
    #[error("directory report at {} could not be loaded: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },
}

/// One row of the HRIS directory report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub work_email: Option<String>,
    #[serde(default)]
    pub original_hire_date: Option<String>,
    #[serde(default, rename = "customSageID")]
    pub sage_id: Option<String>,
}

impl DirectoryEntry {
    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or_default();
        let last = self.last_name.as_deref().unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }
}

/// Lookup seam used by the reconstructor and the roster builder. Calls may
/// block on the network; implementations must be shareable across workers.
pub trait DirectoryLookup: Send + Sync {
    /// Directory value for the employee's original hire date, if any.
    fn fetch_original_hire_date(&self, employee_id: &str) -> Result<Option<NaiveDate>, LookupError>;

    fn fetch_sage_id(&self, employee_id: &str) -> Result<Option<String>, LookupError>;

    fn employee(&self, employee_id: &str) -> Option<DirectoryEntry>;
}

#[derive(Debug, Deserialize)]
struct DirectoryReport {
    employees: Vec<DirectoryEntry>,
}

/// Directory backed by a saved report export (`{"employees": [...]}`).
#[derive(Debug, Clone, Default)]
pub struct JsonDirectory {
    entries: HashMap<String, DirectoryEntry>,
}

impl JsonDirectory {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let load_err = |reason: String| LookupError::Load {
            path: path.to_path_buf(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let report: DirectoryReport =
            serde_json::from_str(&raw).map_err(|e| load_err(e.to_string()))?;
        info!(
            report = %path.display(),
            employees = report.employees.len(),
            "directory report loaded"
        );
        Ok(Self::from_entries(report.employees))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DirectoryLookup for JsonDirectory {
    fn fetch_original_hire_date(&self, employee_id: &str) -> Result<Option<NaiveDate>, LookupError> {
        let Some(raw) = self
            .entries
            .get(employee_id)
            .and_then(|entry| entry.original_hire_date.as_deref())
            .filter(|raw| !raw.trim().is_empty())
        else {
            return Ok(None);
        };
        raw.parse::<EventDate>()
            .map(EventDate::known)
            .map_err(|_| LookupError::InvalidDate {
                employee_id: employee_id.to_string(),
                value: raw.to_string(),
            })
    }

    fn fetch_sage_id(&self, employee_id: &str) -> Result<Option<String>, LookupError> {
        Ok(self
            .entries
            .get(employee_id)
            .and_then(|entry| entry.sage_id.clone()))
    }

    fn employee(&self, employee_id: &str) -> Option<DirectoryEntry> {
        self.entries.get(employee_id).cloned()
    }
}
