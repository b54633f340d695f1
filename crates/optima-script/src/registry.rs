//! Script source registry: discovery, loading and change polling.
//!
//! The on-disk layout maps directly to scopes:
//!
//! ```text
//! <root>/global/<name>.lua          -> Scope::Global
//! <root>/pages/<page_id>/<name>.lua -> Scope::Page(page_id)
//! <root>/shared/<name>.lua          -> Scope::Shared
//! ```
//!
//! Discovery order is lexicographic by relative path within each scope
//! directory, which makes hook invocation order reproducible across runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::Serialize;

use optima_core::PageId;

use crate::error::{ScriptError, ScriptResult};

const SCRIPT_EXTENSION: &str = "lua";
const GLOBAL_DIR: &str = "global";
const PAGES_DIR: &str = "pages";
const SHARED_DIR: &str = "shared";

/// Namespace level a script unit belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Hooks apply to every event.
    Global,

    /// Library-only modules, import targets, never dispatched.
    Shared,

    /// Hooks apply to events for one page.
    Page(PageId),
}

impl Scope {
    /// Shared modules are import targets only.
    pub fn is_dispatch_target(&self) -> bool {
        !matches!(self, Self::Shared)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Shared => f.write_str("shared"),
            Self::Page(id) => write!(f, "page:{id}"),
        }
    }
}

/// Identity of a script unit: its root-relative path with `/` separators,
/// e.g. `pages/feuille_1/demo.lua`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem of the unit, used as the import name for shared modules.
    pub fn stem(&self) -> &str {
        let name = self.0.rsplit('/').next().unwrap_or(&self.0);
        name.strip_suffix(".lua").unwrap_or(name)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered script unit.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptUnit {
    /// Identity, stable across rediscovery.
    pub id: UnitId,

    /// Scope the unit's hooks (or exports) belong to.
    pub scope: Scope,

    /// Absolute path of the source file.
    pub path: PathBuf,

    /// Last-modified marker, `None` when metadata was unreadable.
    #[serde(skip)]
    pub modified: Option<SystemTime>,

    /// Source length in bytes, part of the change fingerprint.
    pub size: u64,
}

impl ScriptUnit {
    fn fingerprint(&self) -> (Option<SystemTime>, u64) {
        (self.modified, self.size)
    }
}

/// One change observed by a [`SourceRegistry::watch`] poll cycle.
#[derive(Debug, Clone)]
pub enum SourceChange {
    /// A unit appeared since the previous cycle.
    Added(ScriptUnit),

    /// A unit's source fingerprint changed.
    Modified(ScriptUnit),

    /// A unit disappeared.
    Removed(UnitId),
}

/// Enumerates script units under a scripts root and polls them for changes.
///
/// A missing root is not an error: the application may ship without any
/// scripts, in which case discovery is simply empty.
pub struct SourceRegistry {
    root: PathBuf,
    units: IndexMap<UnitId, ScriptUnit>,
}

impl SourceRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            units: IndexMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the scripts root and record every unit in discovery order.
    ///
    /// Unreadable entries become `SourceUnavailable` diagnostics and never
    /// abort discovery of sibling units.
    pub fn discover(&mut self) -> (Vec<ScriptUnit>, Vec<ScriptError>) {
        let mut units = IndexMap::new();
        let mut diagnostics = vec![];

        self.scan_dir(
            &self.root.join(GLOBAL_DIR),
            GLOBAL_DIR,
            Scope::Global,
            &mut units,
            &mut diagnostics,
        );
        self.scan_pages(&mut units, &mut diagnostics);
        self.scan_dir(
            &self.root.join(SHARED_DIR),
            SHARED_DIR,
            Scope::Shared,
            &mut units,
            &mut diagnostics,
        );

        self.units = units;
        (self.units.values().cloned().collect(), diagnostics)
    }

    /// Load a unit's source text.
    pub fn load(&self, unit: &ScriptUnit) -> ScriptResult<String> {
        fs::read_to_string(&unit.path).map_err(|source| ScriptError::SourceUnavailable {
            path: unit.path.clone(),
            source,
        })
    }

    /// One poll cycle: re-walk the root and diff against the previous state.
    ///
    /// The returned sequence is finite and the registry state advances, so
    /// polling is restartable at any time.
    pub fn watch(&mut self) -> (Vec<SourceChange>, Vec<ScriptError>) {
        let previous = std::mem::take(&mut self.units);
        let (_, diagnostics) = self.discover();

        let mut changes = vec![];
        for (id, unit) in &self.units {
            match previous.get(id) {
                None => changes.push(SourceChange::Added(unit.clone())),
                Some(old) if old.fingerprint() != unit.fingerprint() => {
                    changes.push(SourceChange::Modified(unit.clone()));
                }
                Some(_) => {}
            }
        }
        for id in previous.keys() {
            if !self.units.contains_key(id) {
                changes.push(SourceChange::Removed(id.clone()));
            }
        }

        (changes, diagnostics)
    }

    /// Units in discovery order.
    pub fn units(&self) -> impl Iterator<Item = &ScriptUnit> {
        self.units.values()
    }

    fn scan_pages(
        &self,
        units: &mut IndexMap<UnitId, ScriptUnit>,
        diagnostics: &mut Vec<ScriptError>,
    ) {
        let pages_root = self.root.join(PAGES_DIR);
        let mut page_dirs = match sorted_entries(&pages_root, diagnostics) {
            Some(entries) => entries,
            None => return,
        };
        page_dirs.retain(|p| p.is_dir());

        for dir in page_dirs {
            let Some(page_id) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let prefix = format!("{PAGES_DIR}/{page_id}");
            let scope = Scope::Page(PageId::new(page_id));
            self.scan_dir(&dir, &prefix, scope, units, diagnostics);
        }
    }

    fn scan_dir(
        &self,
        dir: &Path,
        prefix: &str,
        scope: Scope,
        units: &mut IndexMap<UnitId, ScriptUnit>,
        diagnostics: &mut Vec<ScriptError>,
    ) {
        let Some(entries) = sorted_entries(dir, diagnostics) else {
            return;
        };

        for path in entries {
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let id = UnitId::new(format!("{prefix}/{name}"));

            let (modified, size) = match fs::metadata(&path) {
                Ok(meta) => (meta.modified().ok(), meta.len()),
                Err(source) => {
                    diagnostics.push(ScriptError::SourceUnavailable {
                        path: path.clone(),
                        source,
                    });
                    continue;
                }
            };

            units.insert(
                id.clone(),
                ScriptUnit {
                    id,
                    scope: scope.clone(),
                    path,
                    modified,
                    size,
                },
            );
        }
    }
}

/// Directory entries sorted by file name. `None` when the directory does not
/// exist; unreadable directories are reported and treated as empty.
fn sorted_entries(dir: &Path, diagnostics: &mut Vec<ScriptError>) -> Option<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return None,
        Err(source) => {
            diagnostics.push(ScriptError::SourceUnavailable {
                path: dir.to_path_buf(),
                source,
            });
            return None;
        }
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    Some(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scripts_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("global")).unwrap();
        fs::create_dir_all(dir.path().join("pages/feuille_1")).unwrap();
        fs::create_dir_all(dir.path().join("shared")).unwrap();
        fs::write(dir.path().join("global/default.lua"), "return {}").unwrap();
        fs::write(dir.path().join("pages/feuille_1/demo.lua"), "return {}").unwrap();
        fs::write(dir.path().join("shared/default.lua"), "return {}").unwrap();
        dir
    }

    #[test]
    fn test_discover_maps_directories_to_scopes() {
        let root = scripts_root();
        let mut registry = SourceRegistry::new(root.path());
        let (units, diagnostics) = registry.discover();

        assert!(diagnostics.is_empty());
        let scopes: Vec<_> = units.iter().map(|u| u.scope.clone()).collect();
        assert_eq!(
            scopes,
            vec![
                Scope::Global,
                Scope::Page(PageId::new("feuille_1")),
                Scope::Shared,
            ]
        );
    }

    #[test]
    fn test_discover_is_idempotent_and_ordered() {
        let root = scripts_root();
        fs::write(root.path().join("global/aaa.lua"), "return {}").unwrap();
        let mut registry = SourceRegistry::new(root.path());

        let (first, _) = registry.discover();
        let (second, _) = registry.discover();

        let ids: Vec<_> = first.iter().map(|u| u.id.as_str().to_string()).collect();
        assert_eq!(ids[0], "global/aaa.lua");
        assert_eq!(ids[1], "global/default.lua");
        assert_eq!(
            ids,
            second
                .iter()
                .map(|u| u.id.as_str().to_string())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_missing_root_is_empty_not_an_error() {
        let mut registry = SourceRegistry::new("/nonexistent/optima/scripts");
        let (units, diagnostics) = registry.discover();
        assert!(units.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_non_lua_files_are_ignored() {
        let root = scripts_root();
        fs::write(root.path().join("global/readme.txt"), "notes").unwrap();
        let mut registry = SourceRegistry::new(root.path());
        let (units, _) = registry.discover();
        assert!(units.iter().all(|u| u.id.as_str().ends_with(".lua")));
    }

    #[test]
    fn test_watch_reports_added_modified_removed() {
        let root = scripts_root();
        let mut registry = SourceRegistry::new(root.path());
        registry.discover();

        fs::write(root.path().join("global/extra.lua"), "return {}").unwrap();
        // Different length so the fingerprint changes even on coarse clocks.
        fs::write(
            root.path().join("pages/feuille_1/demo.lua"),
            "return { on_page_enter = function(ctx) end }",
        )
        .unwrap();
        fs::remove_file(root.path().join("shared/default.lua")).unwrap();

        let (changes, _) = registry.watch();
        let mut added = 0;
        let mut modified = 0;
        let mut removed = 0;
        for change in &changes {
            match change {
                SourceChange::Added(u) => {
                    added += 1;
                    assert_eq!(u.id.as_str(), "global/extra.lua");
                }
                SourceChange::Modified(u) => {
                    modified += 1;
                    assert_eq!(u.id.as_str(), "pages/feuille_1/demo.lua");
                }
                SourceChange::Removed(id) => {
                    removed += 1;
                    assert_eq!(id.as_str(), "shared/default.lua");
                }
            }
        }
        assert_eq!((added, modified, removed), (1, 1, 1));
    }

    #[test]
    fn test_load_failure_is_source_unavailable() {
        let root = scripts_root();
        let mut registry = SourceRegistry::new(root.path());
        let (units, _) = registry.discover();

        // The file vanishes between discovery and load.
        fs::remove_file(root.path().join("global/default.lua")).unwrap();

        let gone = units
            .iter()
            .find(|u| u.id.as_str() == "global/default.lua")
            .unwrap();
        let err = registry.load(gone).unwrap_err();
        assert!(matches!(err, ScriptError::SourceUnavailable { .. }));

        // Siblings are unaffected.
        let sibling = units
            .iter()
            .find(|u| u.id.as_str() == "shared/default.lua")
            .unwrap();
        assert!(registry.load(sibling).is_ok());
    }

    #[test]
    fn test_unit_stem() {
        assert_eq!(UnitId::new("shared/default.lua").stem(), "default");
        assert_eq!(UnitId::new("pages/notes_1/x.lua").stem(), "x");
    }
}
