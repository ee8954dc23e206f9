//! Employment lifecycle reconstruction. `events` holds the raw status-change
//! rows; `reconstruct` turns one employee's rows into the named hire,
//! termination and rehire dates.

pub mod events;
pub mod reconstruct;

pub use events::{EmployeeStatusRecord, EmploymentEvent, EventDate, RecordError, SENTINEL_DATE};
pub use reconstruct::{
    derive_date, derive_lifecycle, derive_original_hire, EventKind, LifecycleDates,
    LifecycleField, ReconstructError,
};
