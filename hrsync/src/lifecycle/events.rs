use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder the HRIS writes when a date field was never filled in.
pub const SENTINEL_DATE: &str = "0000-00-00";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Status text for a plain termination row.
pub const TERMINATED_STATUS: &str = "Terminated";
/// Fragment shared by every termination variant ("Terminated", "Re-Terminated", ...).
const TERMINATION_FRAGMENT: &str = "erminated";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("invalid event date '{0}'; expected YYYY-MM-DD or 0000-00-00")]
    InvalidDate(String),
}

/// A status-change date as recorded, or the sentinel meaning "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventDate {
    Unknown,
    On(NaiveDate),
}

impl EventDate {
    pub fn known(self) -> Option<NaiveDate> {
        match self {
            EventDate::On(date) => Some(date),
            EventDate::Unknown => None,
        }
    }

    pub fn is_sentinel(self) -> bool {
        self == EventDate::Unknown
    }
}

impl FromStr for EventDate {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed == SENTINEL_DATE {
            return Ok(EventDate::Unknown);
        }
        NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(EventDate::On)
            .map_err(|_| RecordError::InvalidDate(value.to_string()))
    }
}

impl TryFrom<String> for EventDate {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventDate> for String {
    fn from(value: EventDate) -> Self {
        value.to_string()
    }
}

impl From<NaiveDate> for EventDate {
    fn from(value: NaiveDate) -> Self {
        EventDate::On(value)
    }
}

impl fmt::Display for EventDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventDate::Unknown => f.write_str(SENTINEL_DATE),
            EventDate::On(date) => write!(f, "{}", date.format(DATE_FORMAT)),
        }
    }
}

/// One row of the employment-status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentEvent {
    pub date: EventDate,
    #[serde(rename = "employmentStatus")]
    pub status: String,
}

impl EmploymentEvent {
    pub fn new(date: EventDate, status: impl Into<String>) -> Self {
        Self {
            date,
            status: status.into(),
        }
    }

    /// Loose fragment match; upstream data spells terminations several ways.
    pub fn is_termination(&self) -> bool {
        self.status.contains(TERMINATION_FRAGMENT)
    }
}

/// All status rows for one employee, earliest first. The order is taken as
/// given and never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeStatusRecord {
    #[serde(rename = "id")]
    pub employee_id: String,
    #[serde(rename = "data")]
    pub events: Vec<EmploymentEvent>,
}

impl EmployeeStatusRecord {
    pub fn new(employee_id: impl Into<String>, events: Vec<EmploymentEvent>) -> Self {
        Self {
            employee_id: employee_id.into(),
            events,
        }
    }
}
