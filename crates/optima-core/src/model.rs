//! Snapshots of live application state handed to the script runtime.
//!
//! Every type here is a value captured at the instant an event is emitted.
//! The runtime never holds references back into the workbook model.

use serde::{Deserialize, Serialize};

/// Identifier of a page (sheet) within a workbook.
///
/// Page ids are opaque slugs (`feuille_1`, `menu_principal`); the runtime
/// uses them only to key per-page script scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Raw value of a cell as entered or produced by the application.
///
/// Scripts receive this as an opaque, stringifiable value; they never see
/// formulas or the evaluation engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Empty cell (stringifies to the empty string).
    #[default]
    Empty,

    /// Boolean value.
    Bool(bool),

    /// Numeric value.
    Number(f64),

    /// Text value.
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Workbook-level state at the instant of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookSnapshot {
    /// Number of pages currently in the workbook.
    pub page_count: u32,
}

/// Page-level state at the instant of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// Identifier keying the page's script scope.
    pub id: PageId,

    /// Human-readable page name shown to scripts.
    pub name: String,
}

impl PageSnapshot {
    pub fn new(id: impl Into<PageId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The cell a change event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    /// Display label of the cell (e.g. `B4`). Empty when unknown.
    pub label: String,
}

/// Descriptor of a single cell edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    /// The raw value the cell now holds.
    pub new_raw: CellValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Empty.to_string(), "");
        assert_eq!(CellValue::Number(42.0).to_string(), "42");
        assert_eq!(CellValue::Text("abc".into()).to_string(), "abc");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_page_id_roundtrip() {
        let id = PageId::new("feuille_1");
        assert_eq!(id.as_str(), "feuille_1");
        assert_eq!(id.to_string(), "feuille_1");
    }
}
