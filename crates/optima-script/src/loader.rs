//! Module loader: compiles script units and owns their compiled handles.
//!
//! Replacement is generational: every successful compile produces a new
//! `Arc<CompiledModule>` with a higher generation and atomically replaces
//! the previous one. Bindings and in-flight invocations keep their own
//! `Arc`, so a swap never interrupts running code; the old module is
//! reclaimed once its last reference drops. A failed recompile leaves the
//! previous module in place: stale-but-working beats broken.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use mlua::RegistryKey;

use crate::engine::ScriptEngine;
use crate::error::ScriptResult;
use crate::hooks::HookName;
use crate::registry::{Scope, ScriptUnit, UnitId};
use crate::sync;

/// A compiled, executable form of one script unit's source.
pub struct CompiledModule {
    /// Unit this module was compiled from.
    pub unit: UnitId,

    /// Scope of the unit at compile time.
    pub scope: Scope,

    /// Monotonic generation; bumped on every successful (re)compile of any
    /// unit, so two modules never share one.
    pub generation: u64,

    /// Exported functions matching the recognized hook-name set. Always
    /// empty for shared modules, which are import targets only.
    pub exports: Vec<HookName>,

    /// Registry handle of the module table inside the engine.
    pub(crate) table: Arc<RegistryKey>,
}

impl CompiledModule {
    /// Whether this module exports the given hook.
    pub fn exports_hook(&self, hook: HookName) -> bool {
        self.exports.contains(&hook)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        unit: UnitId,
        scope: Scope,
        generation: u64,
        exports: Vec<HookName>,
    ) -> Self {
        // A throwaway state just to mint a registry key; tests using this
        // constructor never call into the module.
        let lua = mlua::Lua::new();
        let table = lua.create_table().unwrap();
        let key = lua.create_registry_value(table).unwrap();
        Self {
            unit,
            scope,
            generation,
            exports,
            table: Arc::new(key),
        }
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("unit", &self.unit)
            .field("scope", &self.scope)
            .field("generation", &self.generation)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

/// Compiles units and exclusively owns the compiled module handles.
pub struct ModuleLoader {
    engine: Arc<ScriptEngine>,
    modules: RwLock<HashMap<UnitId, Arc<CompiledModule>>>,
    next_generation: AtomicU64,
}

impl ModuleLoader {
    pub fn new(engine: Arc<ScriptEngine>) -> Self {
        Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Compile a unit and atomically replace any previous module for it.
    ///
    /// On failure the previous module stays active and the error is
    /// returned for the caller's diagnostics.
    pub fn compile(&self, unit: &ScriptUnit, source: &str) -> ScriptResult<Arc<CompiledModule>> {
        let (key, exported_names) = self.engine.compile(unit.id.as_str(), source)?;
        let table = Arc::new(key);

        if unit.scope == Scope::Shared {
            self.engine.register_shared(unit.id.stem(), table.clone());
        }

        // Shared exports are callable through import(), never auto-bound.
        let exports = if unit.scope.is_dispatch_target() {
            exported_names
                .iter()
                .filter_map(|name| HookName::parse(name))
                .collect()
        } else {
            vec![]
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let module = Arc::new(CompiledModule {
            unit: unit.id.clone(),
            scope: unit.scope.clone(),
            generation,
            exports,
            table,
        });

        let previous = sync::write(&self.modules).insert(unit.id.clone(), module.clone());
        if let Some(previous) = previous {
            tracing::debug!(
                target: "script_host",
                unit = %unit.id,
                old_generation = previous.generation,
                new_generation = generation,
                "replaced compiled module"
            );
        }

        Ok(module)
    }

    /// Current module for a unit, if one compiled successfully.
    pub fn get(&self, unit_id: &UnitId) -> Option<Arc<CompiledModule>> {
        sync::read(&self.modules).get(unit_id).cloned()
    }

    /// Discard a removed unit's module. In-flight invocations holding the
    /// module finish normally; the engine reclaims the table afterwards.
    pub fn discard(&self, unit_id: &UnitId) {
        let removed = sync::write(&self.modules).remove(unit_id);
        if let Some(module) = removed {
            if module.scope == Scope::Shared {
                self.engine.unregister_shared(module.unit.stem());
            }
            drop(module);
            self.engine.collect_discarded();
        }
    }

    /// Number of loaded modules.
    pub fn len(&self) -> usize {
        sync::read(&self.modules).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
