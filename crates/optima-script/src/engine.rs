//! Embedded Lua engine.
//!
//! One Lua state hosts every compiled module. Access to the state is
//! serialized through a mutex; compiled module tables are addressed by
//! registry key, so they stay alive for as long as any binding holds its
//! `Arc` to them (the generation scheme behind hot reload).
//!
//! The capability surface exposed to scripts is logging only: `optima.log`
//! and `print` both emit tagged lines into the current invocation's sink.
//! Everything else that could reach the host (`os`, `io`, `load`, ...) is
//! replaced by a denial stub whose use raises a recognizable error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use mlua::{Function, Lua, RegistryKey, Table, Value as LuaValue, Variadic};

use crate::context::EventContext;
use crate::error::{ScriptError, ScriptResult};
use crate::sync;

/// Fixed prefix on every line scripts emit through the logging capability.
pub const LOG_TAG: &str = "[OptimaScript]";

/// Message of the error raised by the deadline hook. Classification relies
/// on [`CallReport::timed_out`], not on this text, so a script raising the
/// same string is still an ordinary failure.
pub(crate) const TIMEOUT_MARKER: &str = "script timeout";

/// Instruction granularity of the deadline check.
const DEADLINE_CHECK_INSTRUCTIONS: u32 = 2048;

/// Installed at engine start: replaces every capability outside the
/// allow-list with a stub that raises on index or call. The raise goes
/// through a host function so the error carries a typed [`CapabilityDenied`]
/// that scripts cannot forge with `error(...)`.
const DENY_CAPABILITIES: &str = r#"
local deny_fn = __optima_deny
__optima_deny = nil
local function deny(name)
    local raise = function()
        deny_fn(name)
    end
    return setmetatable({}, { __index = raise, __newindex = raise, __call = raise })
end
for _, name in ipairs({ "os", "io", "load", "loadfile", "dofile", "debug", "require", "package" }) do
    _G[name] = deny(name)
end
"#;

/// Error raised when a script touches a capability outside the allow-list.
#[derive(Debug)]
pub(crate) struct CapabilityDenied {
    capability: String,
}

impl std::fmt::Display for CapabilityDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "capability '{}' denied", self.capability)
    }
}

impl std::error::Error for CapabilityDenied {}

/// Whether an error chain originates from a denial stub.
pub(crate) fn is_capability_denial(error: &mlua::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if err.downcast_ref::<CapabilityDenied>().is_some() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Lines captured from one hook invocation.
pub(crate) type LogSink = Arc<Mutex<Vec<String>>>;

/// Result of calling one hook function, before classification.
pub(crate) struct CallReport {
    pub outcome: Result<(), mlua::Error>,
    pub log: Vec<String>,

    /// Set when the deadline hook fired during this call.
    pub timed_out: bool,
}

/// The shared Lua state and the per-invocation log plumbing around it.
pub(crate) struct ScriptEngine {
    lua: Mutex<Lua>,

    /// Sink of the invocation currently running, if any. The log closures
    /// capture this slot; it is swapped around each call while the state
    /// mutex is held.
    sink: Arc<Mutex<Option<LogSink>>>,

    /// Compiled shared modules by import name, resolved by the injected
    /// `import()` function.
    shared: Arc<RwLock<HashMap<String, Arc<RegistryKey>>>>,
}

impl ScriptEngine {
    /// Create a fresh engine with the restricted capability surface
    /// installed.
    pub fn new(max_memory: usize) -> ScriptResult<Self> {
        let lua = Lua::new();
        if max_memory > 0 {
            let _ = lua.set_memory_limit(max_memory);
        }

        let sink: Arc<Mutex<Option<LogSink>>> = Arc::new(Mutex::new(None));
        let shared: Arc<RwLock<HashMap<String, Arc<RegistryKey>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let stub_err = |e: mlua::Error| ScriptError::Engine {
            message: format!("failed to install capability stubs: {e}"),
        };
        let deny = lua
            .create_function(|_, capability: String| -> mlua::Result<()> {
                Err(mlua::Error::external(CapabilityDenied { capability }))
            })
            .map_err(stub_err)?;
        lua.globals().set("__optima_deny", deny).map_err(stub_err)?;
        lua.load(DENY_CAPABILITIES)
            .set_name("=capabilities")
            .exec()
            .map_err(stub_err)?;

        install_logging(&lua, &sink)?;
        install_import(&lua, &shared)?;

        Ok(Self {
            lua: Mutex::new(lua),
            sink,
            shared,
        })
    }

    /// Compile a unit's source into a module table.
    ///
    /// The chunk runs here, which is where shared imports resolve and where
    /// syntax or top-level errors surface. Returns the registry key of the
    /// module table and the names of the functions it exports.
    pub fn compile(&self, unit: &str, source: &str) -> ScriptResult<(RegistryKey, Vec<String>)> {
        let lua = sync::lock(&self.lua);

        let value: LuaValue = lua
            .load(source)
            .set_name(unit)
            .eval()
            .map_err(|e| ScriptError::Compile {
                unit: unit.to_string(),
                message: e.to_string(),
            })?;

        let LuaValue::Table(module) = value else {
            return Err(ScriptError::Compile {
                unit: unit.to_string(),
                message: "script must return a module table".to_string(),
            });
        };

        let mut exports = vec![];
        for pair in module.clone().pairs::<String, LuaValue>() {
            if let Ok((name, LuaValue::Function(_))) = pair {
                exports.push(name);
            }
        }
        exports.sort();

        let key = lua
            .create_registry_value(module)
            .map_err(|e| ScriptError::Engine {
                message: format!("failed to retain module '{unit}': {e}"),
            })?;

        Ok((key, exports))
    }

    /// Make a compiled shared module importable under `name`.
    pub fn register_shared(&self, name: &str, module: Arc<RegistryKey>) {
        sync::write(&self.shared).insert(name.to_string(), module);
    }

    /// Drop a shared module's import entry.
    pub fn unregister_shared(&self, name: &str) {
        sync::write(&self.shared).remove(name);
    }

    /// Reclaim registry slots of modules whose last `Arc` was dropped.
    pub fn collect_discarded(&self) {
        sync::lock(&self.lua).expire_registry_values();
    }

    /// Call one exported hook function with a context, under a wall-clock
    /// deadline, capturing everything it logs.
    ///
    /// `Err` here is the fatal engine-internal class only; script-level
    /// failures come back inside the report.
    pub fn call_hook(
        &self,
        module: &RegistryKey,
        function: &str,
        context: &EventContext,
        timeout: Duration,
    ) -> ScriptResult<CallReport> {
        let lua = sync::lock(&self.lua);

        let table: Table = lua.registry_value(module).map_err(|e| ScriptError::Engine {
            message: format!("hook table references a stale module: {e}"),
        })?;

        // A script can mutate its own module table at runtime, so a missing
        // function is a script failure, not an internal one.
        let callable: Function = match table.get(function) {
            Ok(f) => f,
            Err(e) => {
                return Ok(CallReport {
                    outcome: Err(e),
                    log: vec![],
                    timed_out: false,
                });
            }
        };

        let ctx_table = context_to_lua(&lua, context).map_err(|e| ScriptError::Engine {
            message: format!("failed to build context table: {e}"),
        })?;

        let sink: LogSink = Arc::new(Mutex::new(Vec::new()));
        *sync::lock(&self.sink) = Some(sink.clone());

        let deadline = Instant::now() + timeout;
        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = timed_out.clone();
        lua.set_hook(
            mlua::HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INSTRUCTIONS),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    flag.store(true, Ordering::Relaxed);
                    Err(mlua::Error::external(TIMEOUT_MARKER))
                } else {
                    Ok(mlua::VmState::Continue)
                }
            },
        );

        let outcome: Result<(), mlua::Error> = callable.call(ctx_table);

        lua.remove_hook();
        *sync::lock(&self.sink) = None;

        let log = std::mem::take(&mut *sync::lock(&sink));
        Ok(CallReport {
            outcome,
            log,
            timed_out: timed_out.load(Ordering::Relaxed),
        })
    }
}

/// Install `optima.log` and redirect `print` into the sink slot.
fn install_logging(lua: &Lua, sink: &Arc<Mutex<Option<LogSink>>>) -> ScriptResult<()> {
    let engine_err = |e: mlua::Error| ScriptError::Engine {
        message: format!("failed to install logging capability: {e}"),
    };

    let optima = lua.create_table().map_err(engine_err)?;
    optima
        .set("version", env!("CARGO_PKG_VERSION"))
        .map_err(engine_err)?;

    let slot = sink.clone();
    let log = lua
        .create_function(move |_, values: Variadic<LuaValue>| {
            emit_log(&slot, &values);
            Ok(())
        })
        .map_err(engine_err)?;
    optima.set("log", log).map_err(engine_err)?;
    lua.globals().set("optima", optima).map_err(engine_err)?;

    let slot = sink.clone();
    let print = lua
        .create_function(move |_, values: Variadic<LuaValue>| {
            emit_log(&slot, &values);
            Ok(())
        })
        .map_err(engine_err)?;
    lua.globals().set("print", print).map_err(engine_err)?;

    Ok(())
}

fn emit_log(slot: &Arc<Mutex<Option<LogSink>>>, values: &Variadic<LuaValue>) {
    let text = values
        .iter()
        .map(display_value)
        .collect::<Vec<_>>()
        .join("\t");
    tracing::info!(target: "script", "{text}");
    if let Some(sink) = sync::lock(slot).as_ref() {
        sync::lock(sink).push(format!("{LOG_TAG} {text}"));
    }
}

/// Install `import(name)`, resolving shared modules by name.
fn install_import(
    lua: &Lua,
    shared: &Arc<RwLock<HashMap<String, Arc<RegistryKey>>>>,
) -> ScriptResult<()> {
    let modules = shared.clone();
    let import = lua
        .create_function(move |lua, name: String| {
            let key = sync::read(&modules).get(&name).cloned().ok_or_else(|| {
                mlua::Error::external(format!("unknown shared module '{name}'"))
            })?;
            lua.registry_value::<Table>(&key)
        })
        .map_err(|e| ScriptError::Engine {
            message: format!("failed to install import resolver: {e}"),
        })?;

    lua.globals()
        .set("import", import)
        .map_err(|e| ScriptError::Engine {
            message: format!("failed to install import resolver: {e}"),
        })?;

    Ok(())
}

/// Build the context table for one invocation. All four sub-bundles are
/// always present; unpopulated fields are simply absent keys inside an
/// otherwise empty table.
fn context_to_lua(lua: &Lua, context: &EventContext) -> mlua::Result<Table> {
    let root = lua.create_table()?;

    let workbook = lua.create_table()?;
    if let Some(count) = context.workbook.page_count {
        workbook.set("pageCount", count)?;
    }
    root.set("workbook", workbook)?;

    let page = lua.create_table()?;
    if let Some(name) = &context.page.name {
        page.set("name", name.as_str())?;
    }
    root.set("page", page)?;

    let cell = lua.create_table()?;
    if let Some(label) = &context.cell.label {
        cell.set("label", label.as_str())?;
    }
    root.set("cell", cell)?;

    let change = lua.create_table()?;
    if let Some(raw) = &context.change.new_raw {
        change.set("newRaw", cell_value_to_lua(lua, raw)?)?;
    }
    root.set("change", change)?;

    Ok(root)
}

fn cell_value_to_lua(lua: &Lua, value: &optima_core::CellValue) -> mlua::Result<LuaValue> {
    use optima_core::CellValue;
    match value {
        CellValue::Empty => Ok(LuaValue::String(lua.create_string("")?)),
        CellValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
        CellValue::Number(n) => Ok(LuaValue::Number(*n)),
        CellValue::Text(s) => Ok(LuaValue::String(lua.create_string(s)?)),
    }
}

/// Human-readable form of a Lua value for log lines.
fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy(),
        LuaValue::Table(_) => "<table>".to_string(),
        LuaValue::Function(_) => "<function>".to_string(),
        other => format!("<{}>", other.type_name()),
    }
}
