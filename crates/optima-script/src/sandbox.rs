//! Execution sandbox around each hook invocation.
//!
//! Enforces the wall-clock budget and classifies failures. The capability
//! surface itself (logging only, denial stubs for everything else) is
//! installed once at engine start; this module turns the raw call outcome
//! into a contained [`HookOutcome`] so a misbehaving script can never crash
//! the dispatcher.

use std::time::Instant;

use crate::context::EventContext;
use crate::dispatch::{DispatchResult, HookOutcome};
use crate::engine::{ScriptEngine, is_capability_denial};
use crate::error::ScriptResult;
use crate::hooks::HookBinding;

/// Resource limits applied to each hook invocation.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget per invocation in milliseconds.
    pub timeout_ms: u64,

    /// Memory ceiling for the script state in bytes (0 = unlimited).
    pub max_memory: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_memory: 64 * 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Tight limits for untrusted script sets.
    pub fn minimal() -> Self {
        Self {
            timeout_ms: 1000,
            max_memory: 16 * 1024 * 1024,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Invoke one binding with the event context and record what happened.
///
/// `Err` is reserved for engine-internal invariant violations; every
/// script-level failure is folded into the result's outcome.
pub(crate) fn invoke(
    engine: &ScriptEngine,
    binding: &HookBinding,
    context: &EventContext,
    config: &SandboxConfig,
) -> ScriptResult<DispatchResult> {
    let started = Instant::now();
    let report = engine.call_hook(
        &binding.module.table,
        binding.hook.as_str(),
        context,
        config.timeout(),
    )?;

    let outcome = match report.outcome {
        Ok(()) => HookOutcome::Ok,
        Err(_) if report.timed_out => HookOutcome::Timeout {
            timeout_ms: config.timeout_ms,
        },
        Err(error) => classify(error),
    };

    Ok(DispatchResult {
        unit: binding.unit.clone(),
        scope: binding.scope.clone(),
        hook: binding.hook,
        generation: binding.module.generation,
        outcome,
        log: report.log,
        elapsed: started.elapsed(),
    })
}

/// Map a raw script failure onto the error taxonomy. Timeouts are handled
/// before this point via the deadline flag; violations are recognized by
/// their typed cause, so a script raising a lookalike message stays an
/// ordinary failure.
fn classify(error: mlua::Error) -> HookOutcome {
    if matches!(error, mlua::Error::MemoryError(_)) {
        return HookOutcome::SandboxViolation {
            message: "memory limit exceeded".to_string(),
        };
    }
    if is_capability_denial(&error) {
        return HookOutcome::SandboxViolation {
            message: error.to_string(),
        };
    }
    HookOutcome::Failed {
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use optima_core::PageId;

    use crate::loader::ModuleLoader;
    use crate::registry::{Scope, ScriptUnit, UnitId};

    fn binding_for(source: &str, hook: crate::hooks::HookName) -> (Arc<ScriptEngine>, HookBinding) {
        let engine = Arc::new(ScriptEngine::new(0).unwrap());
        let loader = ModuleLoader::new(engine.clone());
        let unit = ScriptUnit {
            id: UnitId::new("pages/p1/t.lua"),
            scope: Scope::Page(PageId::new("p1")),
            path: "pages/p1/t.lua".into(),
            modified: None,
            size: 0,
        };
        let module = loader.compile(&unit, source).unwrap();
        let binding = HookBinding {
            unit: unit.id,
            scope: unit.scope,
            hook,
            module,
        };
        (engine, binding)
    }

    #[test]
    fn test_successful_invocation() {
        let (engine, binding) = binding_for(
            r#"
            local M = {}
            function M.on_page_enter(ctx)
                optima.log("Ouverture de " .. (ctx.page.name or "?"))
            end
            return M
            "#,
            crate::hooks::HookName::OnPageEnter,
        );

        let context = EventContext::build(&optima_core::Event::PageEnter {
            page: optima_core::PageSnapshot::new("p1", "Feuille 1"),
        });
        let result = invoke(&engine, &binding, &context, &SandboxConfig::default()).unwrap();
        assert!(matches!(result.outcome, HookOutcome::Ok));
        assert_eq!(result.log, vec!["[OptimaScript] Ouverture de Feuille 1"]);
        assert!(result.elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_runtime_error_is_contained() {
        let (engine, binding) = binding_for(
            r#"
            local M = {}
            function M.on_page_enter(ctx)
                error("boom")
            end
            return M
            "#,
            crate::hooks::HookName::OnPageEnter,
        );

        let context = EventContext::default();
        let result = invoke(&engine, &binding, &context, &SandboxConfig::default()).unwrap();
        match result.outcome {
            HookOutcome::Failed { message } => assert!(message.contains("boom")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_is_classified() {
        let (engine, binding) = binding_for(
            r#"
            local M = {}
            function M.on_page_enter(ctx)
                while true do end
            end
            return M
            "#,
            crate::hooks::HookName::OnPageEnter,
        );

        let config = SandboxConfig::default().with_timeout(100);
        let result = invoke(&engine, &binding, &EventContext::default(), &config).unwrap();
        assert!(matches!(result.outcome, HookOutcome::Timeout { timeout_ms: 100 }));
    }

    #[test]
    fn test_capability_violation_is_classified() {
        let (engine, binding) = binding_for(
            r#"
            local M = {}
            function M.on_page_enter(ctx)
                io.write("escape attempt")
            end
            return M
            "#,
            crate::hooks::HookName::OnPageEnter,
        );

        let result = invoke(
            &engine,
            &binding,
            &EventContext::default(),
            &SandboxConfig::default(),
        )
        .unwrap();
        assert!(matches!(result.outcome, HookOutcome::SandboxViolation { .. }));
    }

    #[test]
    fn test_denial_lookalike_message_stays_a_failure() {
        let (engine, binding) = binding_for(
            r#"
            local M = {}
            function M.on_page_enter(ctx)
                error("capability 'os' denied")
            end
            return M
            "#,
            crate::hooks::HookName::OnPageEnter,
        );

        let result = invoke(
            &engine,
            &binding,
            &EventContext::default(),
            &SandboxConfig::default(),
        )
        .unwrap();
        assert!(matches!(result.outcome, HookOutcome::Failed { .. }));
    }

    #[test]
    fn test_timeout_lookalike_message_stays_a_failure() {
        let (engine, binding) = binding_for(
            r#"
            local M = {}
            function M.on_page_enter(ctx)
                error("script timeout")
            end
            return M
            "#,
            crate::hooks::HookName::OnPageEnter,
        );

        let result = invoke(
            &engine,
            &binding,
            &EventContext::default(),
            &SandboxConfig::default(),
        )
        .unwrap();
        assert!(matches!(result.outcome, HookOutcome::Failed { .. }));
    }
}
