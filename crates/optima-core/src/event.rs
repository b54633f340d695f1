//! Events the application emits toward the script runtime.

use serde::{Deserialize, Serialize};

use crate::model::{CellSnapshot, ChangeSnapshot, PageId, PageSnapshot, WorkbookSnapshot};

/// An application event carrying the state snapshots scripts may observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A workbook finished loading.
    WorkbookOpen {
        /// Workbook state at open time.
        workbook: WorkbookSnapshot,
    },

    /// A page became the active page.
    PageEnter {
        /// The page being entered.
        page: PageSnapshot,
    },

    /// The raw content of a cell changed.
    CellChanged {
        /// Page the cell belongs to, when one is active.
        page: Option<PageSnapshot>,
        /// The affected cell.
        cell: CellSnapshot,
        /// What changed.
        change: ChangeSnapshot,
    },
}

impl Event {
    /// Kind discriminant, used for hook resolution and event serialization.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WorkbookOpen { .. } => EventKind::WorkbookOpen,
            Self::PageEnter { .. } => EventKind::PageEnter,
            Self::CellChanged { .. } => EventKind::CellChanged,
        }
    }

    /// The page whose scope participates in dispatch, if any.
    ///
    /// Workbook-open has no active page; only global hooks apply.
    pub fn active_page(&self) -> Option<&PageId> {
        match self {
            Self::WorkbookOpen { .. } => None,
            Self::PageEnter { page } => Some(&page.id),
            Self::CellChanged { page, .. } => page.as_ref().map(|p| &p.id),
        }
    }
}

/// Discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkbookOpen,
    PageEnter,
    CellChanged,
}

impl EventKind {
    /// Stable name used in reports and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkbookOpen => "workbook_open",
            Self::PageEnter => "page_enter",
            Self::CellChanged => "cell_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workbook_open_has_no_active_page() {
        let event = Event::WorkbookOpen {
            workbook: WorkbookSnapshot { page_count: 3 },
        };
        assert!(event.active_page().is_none());
        assert_eq!(event.kind(), EventKind::WorkbookOpen);
    }

    #[test]
    fn test_cell_changed_scopes_to_its_page() {
        let event = Event::CellChanged {
            page: Some(PageSnapshot::new("notes_1", "Notes 1")),
            cell: CellSnapshot { label: "B4".into() },
            change: ChangeSnapshot { new_raw: "17".into() },
        };
        assert_eq!(event.active_page().map(|p| p.as_str()), Some("notes_1"));
    }
}
