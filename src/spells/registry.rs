//! Spell registry — discovery and listing.
//!
//! Populated by scanning the spells directory once at startup; immutable
//! afterwards except through an explicit re-scan. Scripts that fail to load
//! or lack a valid `META` record are skipped with a log line, never fatal.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use super::loader::SpellLoader;

/// A listed spell, shaped for the wire (`GET /spells`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub script_file: String,
}

pub struct SpellRegistry {
    /// id → descriptor; BTreeMap keeps listings stable across scans.
    inner: RwLock<BTreeMap<String, SpellDescriptor>>,
}

impl SpellRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Scan `dir` (non-recursive) for `.rhai` scripts and rebuild the
    /// registry from their `META` records. Returns the registry size.
    ///
    /// A missing directory yields an empty registry — a fresh install has
    /// no spells yet.
    pub fn discover(&self, dir: &Path, loader: &SpellLoader) -> usize {
        let mut found = BTreeMap::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), "spells directory not readable: {e}");
                self.swap(found);
                return 0;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "rhai"))
            .collect();
        paths.sort();

        for path in paths {
            let unit = match loader.load(&path) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!(path = %path.display(), "failed to load spell, skipping: {e}");
                    continue;
                }
            };

            let Some(meta) = &unit.meta else {
                debug!(path = %path.display(), "spell has no valid META record, skipping");
                continue;
            };

            if found.contains_key(&meta.id) {
                warn!(id = %meta.id, path = %path.display(), "duplicate spell id, keeping first");
                continue;
            }

            found.insert(
                meta.id.clone(),
                SpellDescriptor {
                    id: meta.id.clone(),
                    name: meta.name.clone(),
                    description: meta.description.clone(),
                    icon: meta.icon.clone(),
                    category: meta.category.clone(),
                    script_file: unit.path.display().to_string(),
                },
            );
        }

        let count = found.len();
        self.swap(found);
        count
    }

    pub fn list(&self) -> Vec<SpellDescriptor> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<SpellDescriptor> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn swap(&self, next: BTreeMap<String, SpellDescriptor>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Default for SpellRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spells::sandbox::{LlmCapability, ScriptSandbox};
    use tempfile::TempDir;

    fn loader() -> SpellLoader {
        SpellLoader::new(ScriptSandbox::new(LlmCapability::Unavailable))
    }

    fn write_spell(dir: &TempDir, name: &str, contents: &str) {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }

    const WELL_FORMED: &str = r#"
const META = #{ id: "shout", name: "Shout", description: "", icon: "!", category: "text" };
fn main(text) { text.to_upper() }
"#;

    #[test]
    fn discover_skips_scripts_without_meta() {
        let dir = TempDir::new().unwrap();
        write_spell(&dir, "shout.rhai", WELL_FORMED);
        write_spell(&dir, "anonymous.rhai", "fn main(text) { text }");

        let registry = SpellRegistry::new();
        let count = registry.discover(dir.path(), &loader());

        assert_eq!(count, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("shout").is_some());
    }

    #[test]
    fn discover_skips_broken_scripts() {
        let dir = TempDir::new().unwrap();
        write_spell(&dir, "shout.rhai", WELL_FORMED);
        write_spell(&dir, "broken.rhai", "this is not rhai ===");

        let registry = SpellRegistry::new();
        assert_eq!(registry.discover(dir.path(), &loader()), 1);
    }

    #[test]
    fn discover_ignores_non_rhai_files() {
        let dir = TempDir::new().unwrap();
        write_spell(&dir, "shout.rhai", WELL_FORMED);
        write_spell(&dir, "notes.txt", "not a spell");

        let registry = SpellRegistry::new();
        assert_eq!(registry.discover(dir.path(), &loader()), 1);
    }

    #[test]
    fn missing_directory_yields_empty_registry() {
        let registry = SpellRegistry::new();
        let count = registry.discover(Path::new("/nonexistent/spells"), &loader());
        assert_eq!(count, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn rescan_replaces_previous_registry() {
        let dir = TempDir::new().unwrap();
        write_spell(&dir, "shout.rhai", WELL_FORMED);

        let loader = loader();
        let registry = SpellRegistry::new();
        assert_eq!(registry.discover(dir.path(), &loader), 1);

        write_spell(
            &dir,
            "count.rhai",
            r##"
const META = #{ id: "count", name: "Count", description: "", icon: "#", category: "text" };
fn main(text) { `${text.len()} characters` }
"##,
        );
        assert_eq!(registry.discover(dir.path(), &loader), 2);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn descriptor_serializes_with_camel_case_keys() {
        let d = SpellDescriptor {
            id: "x".into(),
            name: "X".into(),
            description: "".into(),
            icon: "".into(),
            category: "".into(),
            script_file: "/tmp/x.rhai".into(),
        };
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"scriptFile\""));
        assert!(!json.contains("script_file"));
    }
}
