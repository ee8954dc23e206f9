//! Canonical lifecycle dates from an unordered-in-meaning status log.
//!
//! Terminations are counted in row order. The Nth termination is the Nth row
//! whose status contains the termination fragment; the Nth rehire is the first
//! non-termination row seen once exactly N terminations have happened.
//!
//! Original hire is special: the first row's date wins unless the second row
//! is not a plain "Terminated" and carries a strictly earlier date. That
//! override covers backfilled hire rows logged after the nominal first record.
//! It has not been checked against every historical edge case.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::directory::{DirectoryLookup, LookupError};
use crate::lifecycle::events::{EmployeeStatusRecord, EmploymentEvent, EventDate, TERMINATED_STATUS};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("employee {employee_id} has no employment events")]
    InvalidRecord { employee_id: String },
    #[error("original hire lookup failed for employee {employee_id}: {source}")]
    Lookup {
        employee_id: String,
        #[source]
        source: LookupError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Terminated,
    Hire,
}

/// The six derived outputs, in posting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleField {
    OriginalHire,
    Termination1,
    Rehire1,
    Termination2,
    Rehire2,
    Termination3,
}

impl LifecycleField {
    pub const ALL: [LifecycleField; 6] = [
        LifecycleField::OriginalHire,
        LifecycleField::Termination1,
        LifecycleField::Rehire1,
        LifecycleField::Termination2,
        LifecycleField::Rehire2,
        LifecycleField::Termination3,
    ];

    /// `(occurrence, kind)` scan for this field; `None` for original hire.
    pub fn query(self) -> Option<(usize, EventKind)> {
        match self {
            LifecycleField::OriginalHire => None,
            LifecycleField::Termination1 => Some((1, EventKind::Terminated)),
            LifecycleField::Rehire1 => Some((1, EventKind::Hire)),
            LifecycleField::Termination2 => Some((2, EventKind::Terminated)),
            LifecycleField::Rehire2 => Some((2, EventKind::Hire)),
            LifecycleField::Termination3 => Some((3, EventKind::Terminated)),
        }
    }

    /// Sheet column the field is posted under.
    pub fn column(self) -> &'static str {
        match self {
            LifecycleField::OriginalHire => "HRIS Original Hire",
            LifecycleField::Termination1 => "HRIS Original Termination",
            LifecycleField::Rehire1 => "HRIS Rehire",
            LifecycleField::Termination2 => "HRIS Retermination",
            LifecycleField::Rehire2 => "HRIS Final Hire",
            LifecycleField::Termination3 => "HRIS Final Termination",
        }
    }
}

/// Derived dates for one employee. `None` means the event never happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleDates {
    pub original_hire: Option<EventDate>,
    pub termination_1: Option<EventDate>,
    pub rehire_1: Option<EventDate>,
    pub termination_2: Option<EventDate>,
    pub rehire_2: Option<EventDate>,
    pub termination_3: Option<EventDate>,
}

impl LifecycleDates {
    pub fn get(&self, field: LifecycleField) -> Option<EventDate> {
        match field {
            LifecycleField::OriginalHire => self.original_hire,
            LifecycleField::Termination1 => self.termination_1,
            LifecycleField::Rehire1 => self.rehire_1,
            LifecycleField::Termination2 => self.termination_2,
            LifecycleField::Rehire2 => self.rehire_2,
            LifecycleField::Termination3 => self.termination_3,
        }
    }

    fn slot(&mut self, field: LifecycleField) -> &mut Option<EventDate> {
        match field {
            LifecycleField::OriginalHire => &mut self.original_hire,
            LifecycleField::Termination1 => &mut self.termination_1,
            LifecycleField::Rehire1 => &mut self.rehire_1,
            LifecycleField::Termination2 => &mut self.termination_2,
            LifecycleField::Rehire2 => &mut self.rehire_2,
            LifecycleField::Termination3 => &mut self.termination_3,
        }
    }

    /// Posting value: the recorded date, or an empty string.
    pub fn rendered(&self, field: LifecycleField) -> String {
        self.get(field).map(|date| date.to_string()).unwrap_or_default()
    }
}

fn events_of(record: &EmployeeStatusRecord) -> Result<&[EmploymentEvent], ReconstructError> {
    if record.events.is_empty() {
        return Err(ReconstructError::InvalidRecord {
            employee_id: record.employee_id.clone(),
        });
    }
    Ok(&record.events)
}

/// Original hire date. Calls the directory at most once, and only when the
/// first row carries the sentinel date.
pub fn derive_original_hire<L>(
    record: &EmployeeStatusRecord,
    lookup: &L,
) -> Result<Option<NaiveDate>, ReconstructError>
where
    L: DirectoryLookup + ?Sized,
{
    let events = events_of(record)?;
    let hire_date = match events[0].date {
        EventDate::On(date) => Some(date),
        EventDate::Unknown => lookup
            .fetch_original_hire_date(&record.employee_id)
            .map_err(|source| ReconstructError::Lookup {
                employee_id: record.employee_id.clone(),
                source,
            })?,
    };

    if let Some(second) = events.get(1) {
        if second.status != TERMINATED_STATUS {
            // a sentinel-dated second row is never a candidate
            if let Some(second_date) = second.date.known() {
                match hire_date {
                    Some(hire) if second_date < hire => return Ok(Some(second_date)),
                    None => return Ok(Some(second_date)),
                    _ => {}
                }
            }
        }
    }

    Ok(hire_date)
}

/// Date of the `occurrence`-th termination, or of the first non-termination
/// row after it. `None` when the scan finds nothing.
pub fn derive_date(
    record: &EmployeeStatusRecord,
    occurrence: usize,
    kind: EventKind,
) -> Result<Option<EventDate>, ReconstructError> {
    let events = events_of(record)?;
    let mut terminations = 0;
    for event in events {
        if event.is_termination() {
            terminations += 1;
            if kind == EventKind::Terminated && terminations == occurrence {
                return Ok(Some(event.date));
            }
        } else if kind == EventKind::Hire && terminations == occurrence {
            return Ok(Some(event.date));
        }
    }
    Ok(None)
}

/// All six lifecycle outputs for one employee.
pub fn derive_lifecycle<L>(
    record: &EmployeeStatusRecord,
    lookup: &L,
) -> Result<LifecycleDates, ReconstructError>
where
    L: DirectoryLookup + ?Sized,
{
    let mut dates = LifecycleDates {
        original_hire: derive_original_hire(record, lookup)?.map(EventDate::On),
        ..LifecycleDates::default()
    };
    for field in LifecycleField::ALL {
        if let Some((occurrence, kind)) = field.query() {
            *dates.slot(field) = derive_date(record, occurrence, kind)?;
        }
    }
    Ok(dates)
}
