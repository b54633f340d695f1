//! Event dispatcher.
//!
//! A dispatch moves through `Idle -> Resolving -> Invoking -> Aggregating`
//! and back. Resolving computes the invocation plan from the scope chain
//! (`[Global, Page(current)]` when a page is active, `[Global]` otherwise)
//! using hook-table order within each scope. Invoking runs every binding in
//! the sandbox with the single context snapshot for the event; a failing
//! hook is recorded and never aborts the plan. Aggregating hands the
//! ordered results back to the application.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{trace, warn};

use optima_core::{Event, EventKind, PageId};

use crate::context::EventContext;
use crate::engine::ScriptEngine;
use crate::error::{ScriptError, ScriptResult};
use crate::hooks::{HookName, HookTable};
use crate::registry::{Scope, UnitId};
use crate::sandbox::{self, SandboxConfig};
use crate::sync;

/// Terminal state of one hook invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HookOutcome {
    /// The hook returned normally (return values are ignored).
    Ok,

    /// The invocation exceeded its wall-clock budget and was abandoned.
    Timeout { timeout_ms: u64 },

    /// The hook touched a capability outside the allow-list or exceeded a
    /// resource limit.
    SandboxViolation { message: String },

    /// An uncaught failure inside the hook body.
    Failed { message: String },
}

impl HookOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Record of one hook invocation within a dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    /// Unit the hook came from.
    pub unit: UnitId,

    /// Scope the binding was resolved in.
    pub scope: Scope,

    /// Which hook ran.
    pub hook: HookName,

    /// Generation of the compiled module that was invoked.
    pub generation: u64,

    /// How the invocation ended.
    pub outcome: HookOutcome,

    /// Lines the hook emitted through the logging capability.
    pub log: Vec<String>,

    /// Wall-clock time the invocation took.
    pub elapsed: Duration,
}

impl DispatchResult {
    /// The outcome as a taxonomy error, for application-side logging and UI.
    pub fn error(&self) -> Option<ScriptError> {
        let unit = self.unit.to_string();
        let hook = self.hook.as_str().to_string();
        match &self.outcome {
            HookOutcome::Ok => None,
            HookOutcome::Timeout { timeout_ms } => Some(ScriptError::Timeout {
                unit,
                hook,
                timeout_ms: *timeout_ms,
            }),
            HookOutcome::SandboxViolation { message } => Some(ScriptError::SandboxViolation {
                unit,
                hook,
                message: message.clone(),
            }),
            HookOutcome::Failed { message } => Some(ScriptError::Invocation {
                unit,
                hook,
                message: message.clone(),
            }),
        }
    }
}

/// Ordered results of one event dispatch, in invocation order.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    /// Kind of the dispatched event.
    pub kind: EventKind,

    /// One entry per bound hook, regardless of individual failure.
    pub results: Vec<DispatchResult>,
}

impl EventReport {
    /// Results that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &DispatchResult> {
        self.results.iter().filter(|r| !r.outcome.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

type EventKey = (EventKind, Option<PageId>);

/// Resolves and invokes all applicable hooks for one event.
///
/// Safe to call from multiple application threads; dispatches of logically
/// identical events (same kind and page) are serialized, distinct events
/// may proceed concurrently.
pub struct Dispatcher {
    engine: Arc<ScriptEngine>,
    table: Arc<HookTable>,
    sandbox: SandboxConfig,
    in_flight: DashMap<EventKey, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub(crate) fn new(
        engine: Arc<ScriptEngine>,
        table: Arc<HookTable>,
        sandbox: SandboxConfig,
    ) -> Self {
        Self {
            engine,
            table,
            sandbox,
            in_flight: DashMap::new(),
        }
    }

    /// Dispatch one event end to end.
    ///
    /// `Err` is the fatal engine-internal class only; per-hook failures are
    /// recorded inside the report.
    pub fn dispatch(&self, event: &Event) -> ScriptResult<EventReport> {
        let key: EventKey = (event.kind(), event.active_page().cloned());
        let gate = {
            let entry = self
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.clone()
        };
        let serialized = sync::lock(&gate);

        // Resolving
        let hook = HookName::for_event(event.kind());
        let mut plan = self.table.bindings_for(&Scope::Global, hook);
        if let Some(page) = event.active_page() {
            plan.extend(self.table.bindings_for(&Scope::Page(page.clone()), hook));
        }
        trace!(
            target: "script_host",
            event = %event.kind(),
            bindings = plan.len(),
            "resolved dispatch plan"
        );

        let context = EventContext::build(event);

        // Invoking
        let mut results = Vec::with_capacity(plan.len());
        for binding in &plan {
            let result = sandbox::invoke(&self.engine, binding, &context, &self.sandbox)?;
            if !result.outcome.is_ok() {
                warn!(
                    target: "script_host",
                    unit = %result.unit,
                    hook = %result.hook,
                    outcome = ?result.outcome,
                    "hook invocation failed"
                );
            }
            results.push(result);
        }

        // Aggregating
        let report = EventReport {
            kind: event.kind(),
            results,
        };

        drop(serialized);
        drop(gate);
        // Retire the gate entry once no other dispatch is waiting on it, so
        // pages that come and go never accumulate stale entries.
        self.in_flight
            .remove_if(&key, |_, gate| Arc::strong_count(gate) == 1);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use optima_core::{PageSnapshot, WorkbookSnapshot};

    use crate::engine::ScriptEngine;

    #[test]
    fn test_gate_entries_are_retired_after_dispatch() {
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptEngine::new(0).unwrap()),
            Arc::new(HookTable::new()),
            SandboxConfig::default(),
        );

        dispatcher
            .dispatch(&Event::PageEnter {
                page: PageSnapshot::new("p1", "P1"),
            })
            .unwrap();
        dispatcher
            .dispatch(&Event::WorkbookOpen {
                workbook: WorkbookSnapshot { page_count: 1 },
            })
            .unwrap();

        assert!(dispatcher.in_flight.is_empty());
    }
}
