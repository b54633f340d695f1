//! Hook names, bindings and the per-scope hook table.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::Serialize;

use optima_core::EventKind;

use crate::loader::CompiledModule;
use crate::registry::{Scope, ScriptUnit, UnitId};
use crate::sync;

/// The recognized hook names. A script exporting any other function name is
/// legal; those functions are simply never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    OnWorkbookOpen,
    OnPageEnter,
    OnCellChanged,
}

impl HookName {
    pub const RECOGNIZED: [HookName; 3] = [
        Self::OnWorkbookOpen,
        Self::OnPageEnter,
        Self::OnCellChanged,
    ];

    /// The exact function name scripts must export.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnWorkbookOpen => "on_workbook_open",
            Self::OnPageEnter => "on_page_enter",
            Self::OnCellChanged => "on_cell_changed",
        }
    }

    /// Match an exported function name against the recognized set.
    pub fn parse(name: &str) -> Option<Self> {
        Self::RECOGNIZED.into_iter().find(|h| h.as_str() == name)
    }

    /// The hook an event kind dispatches to.
    pub fn for_event(kind: EventKind) -> Self {
        match kind {
            EventKind::WorkbookOpen => Self::OnWorkbookOpen,
            EventKind::PageEnter => Self::OnPageEnter,
            EventKind::CellChanged => Self::OnCellChanged,
        }
    }
}

impl std::fmt::Display for HookName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved pairing of scope, hook name and compiled callable.
///
/// The binding holds its own `Arc` to the compiled module, so a module swap
/// after resolution does not affect an in-flight invocation.
#[derive(Debug, Clone)]
pub struct HookBinding {
    pub unit: UnitId,
    pub scope: Scope,
    pub hook: HookName,
    pub module: Arc<CompiledModule>,
}

struct TableEntry {
    scope: Scope,
    module: Arc<CompiledModule>,
}

/// Maps (scope, hook name) to the ordered bindings found across loaded
/// modules.
///
/// Entries are keyed by unit id and kept sorted, so binding order within a
/// scope always follows registry discovery order. Mutations replace entries
/// under a write lock; readers never observe a half-updated list.
#[derive(Default)]
pub struct HookTable {
    entries: RwLock<IndexMap<UnitId, TableEntry>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) a unit's compiled module. Shared units are import
    /// targets only and are never entered into the table.
    pub fn bind(&self, unit: &ScriptUnit, module: Arc<CompiledModule>) {
        if !unit.scope.is_dispatch_target() {
            return;
        }
        let mut entries = sync::write(&self.entries);
        entries.insert(
            unit.id.clone(),
            TableEntry {
                scope: unit.scope.clone(),
                module,
            },
        );
        entries.sort_keys();
    }

    /// Remove a unit's bindings, if any.
    pub fn unbind(&self, unit_id: &UnitId) {
        sync::write(&self.entries).shift_remove(unit_id);
    }

    /// Bindings for one (scope, hook) pair, in discovery order.
    pub fn bindings_for(&self, scope: &Scope, hook: HookName) -> Vec<HookBinding> {
        sync::read(&self.entries)
            .iter()
            .filter(|(_, entry)| entry.scope == *scope && entry.module.exports_hook(hook))
            .map(|(id, entry)| HookBinding {
                unit: id.clone(),
                scope: entry.scope.clone(),
                hook,
                module: entry.module.clone(),
            })
            .collect()
    }

    /// Number of bound units.
    pub fn len(&self) -> usize {
        sync::read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The module currently bound for a unit, if any.
    pub fn module_for(&self, unit_id: &UnitId) -> Option<Arc<CompiledModule>> {
        sync::read(&self.entries)
            .get(unit_id)
            .map(|entry| entry.module.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optima_core::PageId;

    fn test_unit(id: &str, scope: Scope) -> ScriptUnit {
        ScriptUnit {
            id: UnitId::new(id),
            scope,
            path: std::path::PathBuf::from(id),
            modified: None,
            size: 0,
        }
    }

    fn test_module(id: &str, scope: Scope, generation: u64, exports: Vec<HookName>) -> Arc<CompiledModule> {
        Arc::new(CompiledModule::for_tests(
            UnitId::new(id),
            scope,
            generation,
            exports,
        ))
    }

    #[test]
    fn test_hook_name_parse() {
        assert_eq!(HookName::parse("on_page_enter"), Some(HookName::OnPageEnter));
        assert_eq!(HookName::parse("helper"), None);
        assert_eq!(HookName::parse("_log"), None);
    }

    #[test]
    fn test_bindings_follow_discovery_order() {
        let table = HookTable::new();
        let scope = Scope::Page(PageId::new("p1"));
        let exports = vec![HookName::OnPageEnter];

        // Bound out of lexicographic order on purpose.
        let b = test_unit("pages/p1/b.lua", scope.clone());
        let a = test_unit("pages/p1/a.lua", scope.clone());
        table.bind(&b, test_module("pages/p1/b.lua", scope.clone(), 1, exports.clone()));
        table.bind(&a, test_module("pages/p1/a.lua", scope.clone(), 2, exports.clone()));

        let bindings = table.bindings_for(&scope, HookName::OnPageEnter);
        let ids: Vec<_> = bindings.iter().map(|b| b.unit.as_str()).collect();
        assert_eq!(ids, vec!["pages/p1/a.lua", "pages/p1/b.lua"]);
    }

    #[test]
    fn test_shared_units_are_never_bound() {
        let table = HookTable::new();
        let unit = test_unit("shared/default.lua", Scope::Shared);
        table.bind(
            &unit,
            test_module("shared/default.lua", Scope::Shared, 1, vec![]),
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_rebind_replaces_only_that_unit() {
        let table = HookTable::new();
        let exports = vec![HookName::OnPageEnter];
        let scope = Scope::Global;

        let a = test_unit("global/a.lua", scope.clone());
        let b = test_unit("global/b.lua", scope.clone());
        table.bind(&a, test_module("global/a.lua", scope.clone(), 1, exports.clone()));
        table.bind(&b, test_module("global/b.lua", scope.clone(), 2, exports.clone()));

        table.bind(&a, test_module("global/a.lua", scope.clone(), 7, exports.clone()));

        let bindings = table.bindings_for(&scope, HookName::OnPageEnter);
        assert_eq!(bindings[0].module.generation, 7);
        assert_eq!(bindings[1].module.generation, 2);
        assert_eq!(bindings.len(), 2);
    }
}
