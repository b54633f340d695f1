//! Event context construction.
//!
//! A context is an immutable snapshot built once per dispatch. All four
//! sub-bundles are always structurally present; fields the event does not
//! populate stay empty, so defensive lookups in scripts always succeed.
//! Each invocation receives its own copy of the context on the script side,
//! so one hook mutating what it was given never affects its siblings.

use serde::Serialize;

use optima_core::{CellValue, Event};

/// Immutable data bundle passed to a hook invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventContext {
    pub workbook: WorkbookBundle,
    pub page: PageBundle,
    pub cell: CellBundle,
    pub change: ChangeBundle,
}

/// Workbook sub-bundle (`context.workbook` on the script side).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkbookBundle {
    /// `pageCount`, populated for workbook-open events.
    pub page_count: Option<u32>,
}

/// Page sub-bundle (`context.page`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageBundle {
    /// `name`, populated for page-enter events.
    pub name: Option<String>,
}

/// Cell sub-bundle (`context.cell`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CellBundle {
    /// `label`, always populated for cell-changed events (empty string when
    /// the application did not know the cell).
    pub label: Option<String>,
}

/// Change sub-bundle (`context.change`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeBundle {
    /// `newRaw`, always populated for cell-changed events (an empty value
    /// when the cell was cleared).
    pub new_raw: Option<CellValue>,
}

impl EventContext {
    /// Snapshot the event into a context. Values are captured here, at the
    /// instant of dispatch, and never refreshed afterwards.
    pub fn build(event: &Event) -> Self {
        match event {
            Event::WorkbookOpen { workbook } => Self {
                workbook: WorkbookBundle {
                    page_count: Some(workbook.page_count),
                },
                ..Self::default()
            },
            Event::PageEnter { page } => Self {
                page: PageBundle {
                    name: Some(page.name.clone()),
                },
                ..Self::default()
            },
            Event::CellChanged { cell, change, .. } => Self {
                cell: CellBundle {
                    label: Some(cell.label.clone()),
                },
                change: ChangeBundle {
                    new_raw: Some(change.new_raw.clone()),
                },
                ..Self::default()
            },
        }
    }
}
