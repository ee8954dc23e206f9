//! Employment history sync from the HRIS into sheet-style sinks, plus the
//! encrypted token vault the sync's credentials are kept in.
//!
//! The vault (`vault`, `crypto`) and the lifecycle reconstructor
//! (`lifecycle`) are independent; `sync` wires the reconstructor to the
//! directory and posting collaborators.

pub mod config;
pub mod crypto;
pub mod directory;
pub mod lifecycle;
pub mod persist;
pub mod posting;
pub mod sync;
pub mod telemetry;
pub mod vault;
