//! Application-boundary types shared between the Optima application and
//! its script-hosting runtime.
//!
//! The spreadsheet itself (workbook model, evaluation engine) lives on the
//! application side; this crate only defines the snapshots and events that
//! cross into the scripting layer.

mod event;
mod model;

pub use event::{Event, EventKind};
pub use model::{CellSnapshot, CellValue, ChangeSnapshot, PageId, PageSnapshot, WorkbookSnapshot};
