//! Script-hosting runtime for the Optima spreadsheet.
//!
//! Discovers Lua script units across a layered namespace (global scripts,
//! per-page scripts, shared utility modules), compiles them into modules,
//! resolves event hooks (`on_workbook_open`, `on_page_enter`,
//! `on_cell_changed`) and dispatches application events to them in a
//! deterministic order, with each invocation contained by an execution
//! sandbox.
//!
//! # Example
//!
//! ```ignore
//! use optima_core::{Event, WorkbookSnapshot};
//! use optima_script::{HostConfig, ScriptHost};
//!
//! let config = HostConfig::default().with_scripts_root("assets/scripts");
//! let host = ScriptHost::new(config)?;
//!
//! // Compile and bind every discovered script; diagnostics never abort.
//! for diagnostic in host.load_all() {
//!     eprintln!("{diagnostic}");
//! }
//!
//! let report = host.dispatch(&Event::WorkbookOpen {
//!     workbook: WorkbookSnapshot { page_count: 3 },
//! })?;
//! ```

mod config;
mod context;
mod dispatch;
mod engine;
mod error;
mod hooks;
mod host;
mod loader;
mod registry;
mod sandbox;
mod sync;

pub use config::HostConfig;
pub use context::{CellBundle, ChangeBundle, EventContext, PageBundle, WorkbookBundle};
pub use dispatch::{DispatchResult, Dispatcher, EventReport, HookOutcome};
pub use engine::LOG_TAG;
pub use error::{ScriptError, ScriptResult};
pub use hooks::{HookBinding, HookName, HookTable};
pub use host::ScriptHost;
pub use loader::{CompiledModule, ModuleLoader};
pub use registry::{Scope, ScriptUnit, SourceChange, SourceRegistry, UnitId};
pub use sandbox::SandboxConfig;
