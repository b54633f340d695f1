//! The script host: the application's single entry point into the runtime.
//!
//! Wires the source registry, module loader, hook table and dispatcher
//! together, and owns the load/refresh lifecycle. Unit-level failures are
//! returned as diagnostics so one broken script never disables the rest.

use std::sync::{Arc, Mutex};

use optima_core::Event;

use crate::config::HostConfig;
use crate::dispatch::{Dispatcher, EventReport};
use crate::engine::ScriptEngine;
use crate::error::{ScriptError, ScriptResult};
use crate::hooks::HookTable;
use crate::loader::{CompiledModule, ModuleLoader};
use crate::registry::{Scope, ScriptUnit, SourceChange, SourceRegistry, UnitId};
use crate::sync;

/// A running script-hosting instance: one global scope, any number of page
/// scopes, one shared import namespace.
pub struct ScriptHost {
    config: HostConfig,
    registry: Mutex<SourceRegistry>,
    loader: ModuleLoader,
    table: Arc<HookTable>,
    dispatcher: Dispatcher,
}

impl ScriptHost {
    /// Create a host for the configured scripts root. No scripts are loaded
    /// until [`ScriptHost::load_all`] runs.
    pub fn new(config: HostConfig) -> ScriptResult<Self> {
        let engine = Arc::new(ScriptEngine::new(config.max_memory_bytes())?);
        let table = Arc::new(HookTable::new());
        let loader = ModuleLoader::new(engine.clone());
        let dispatcher = Dispatcher::new(engine, table.clone(), config.sandbox());
        let registry = Mutex::new(SourceRegistry::new(config.scripts_root.clone()));

        Ok(Self {
            config,
            registry,
            loader,
            table,
            dispatcher,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Discover, compile and bind every script unit.
    ///
    /// Shared modules compile first so imports in dependent scripts resolve.
    /// Returns the diagnostics collected along the way; none of them aborts
    /// loading of sibling units.
    pub fn load_all(&self) -> Vec<ScriptError> {
        let mut registry = sync::lock(&self.registry);
        let (units, mut diagnostics) = registry.discover();

        let (shared, hooked): (Vec<_>, Vec<_>) =
            units.into_iter().partition(|u| u.scope == Scope::Shared);

        for unit in shared.iter().chain(hooked.iter()) {
            if self.config.is_disabled(unit.id.as_str()) {
                tracing::debug!(target: "script_host", unit = %unit.id, "unit disabled, skipping");
                continue;
            }
            if let Err(error) = self.install(&registry, unit) {
                diagnostics.push(error);
            }
        }

        tracing::info!(
            target: "script_host",
            units = self.loader.len(),
            bound = self.table.len(),
            diagnostics = diagnostics.len(),
            "script set loaded"
        );
        diagnostics
    }

    /// One hot-reload cycle: poll the registry and apply what changed.
    ///
    /// A unit that no longer compiles keeps its previous module bound
    /// (stale-but-working); the compile error comes back as a diagnostic.
    pub fn refresh(&self) -> Vec<ScriptError> {
        let mut registry = sync::lock(&self.registry);
        let (changes, mut diagnostics) = registry.watch();

        for change in changes {
            match change {
                SourceChange::Added(unit) | SourceChange::Modified(unit) => {
                    if self.config.is_disabled(unit.id.as_str()) {
                        continue;
                    }
                    if let Err(error) = self.install(&registry, &unit) {
                        diagnostics.push(error);
                    }
                }
                SourceChange::Removed(unit_id) => {
                    self.table.unbind(&unit_id);
                    self.loader.discard(&unit_id);
                    tracing::debug!(target: "script_host", unit = %unit_id, "unit removed");
                }
            }
        }

        diagnostics
    }

    /// Dispatch one event to every applicable hook.
    pub fn dispatch(&self, event: &Event) -> ScriptResult<EventReport> {
        self.dispatcher.dispatch(event)
    }

    /// Discovered units in discovery order.
    pub fn units(&self) -> Vec<ScriptUnit> {
        sync::lock(&self.registry).units().cloned().collect()
    }

    /// The compiled module currently active for a unit, if any.
    pub fn module_for(&self, unit_id: &UnitId) -> Option<Arc<CompiledModule>> {
        self.loader.get(unit_id)
    }

    fn install(&self, registry: &SourceRegistry, unit: &ScriptUnit) -> ScriptResult<()> {
        let source = registry.load(unit)?;
        let module = self.loader.compile(unit, &source)?;
        self.table.bind(unit, module);
        tracing::debug!(target: "script_host", unit = %unit.id, scope = %unit.scope, "unit installed");
        Ok(())
    }
}
