//! Artefact store
//!
//! Filesystem-rooted source of tool manifests, layered project > user >
//! bundled. A `tool_id` resolves to exactly one file at a time: when the
//! same id exists at multiple scopes the highest-precedence file wins and
//! the rest are invisible.
//!
//! Locations come from scanning `<root>/.ai/tools/<category>/` and reading
//! the id *inside* each file; the filename is never the identifier. Scans
//! are cached behind a reader-writer lock until [`reload`](ArtefactStore::reload).

use crate::extract::{Extractor, SourceKind};
use crate::scopes::{Scope, ScopeRoots};
use sdk::errors::KernelError;
use sdk::types::{ListFilter, ToolInfo};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// A located manifest: where it is and what scanning learned about it
#[derive(Debug, Clone)]
pub struct Located {
    pub tool_id: String,
    pub path: PathBuf,
    pub scope: Scope,
    pub category: String,
    pub version: String,
}

/// Layered manifest store with a cached location index
pub struct ArtefactStore {
    roots: ScopeRoots,
    extractor: Arc<Extractor>,
    cache: RwLock<Option<HashMap<String, Located>>>,
}

impl ArtefactStore {
    pub fn new(roots: ScopeRoots, extractor: Arc<Extractor>) -> Self {
        Self {
            roots,
            extractor,
            cache: RwLock::new(None),
        }
    }

    pub fn roots(&self) -> &ScopeRoots {
        &self.roots
    }

    /// Find the manifest file for a `tool_id`
    pub fn locate(&self, tool_id: &str) -> Result<Located, KernelError> {
        {
            let cache = self.cache.read().expect("store cache lock poisoned");
            if let Some(index) = cache.as_ref() {
                return index
                    .get(tool_id)
                    .cloned()
                    .ok_or_else(|| KernelError::UnresolvedTool(tool_id.to_string()));
            }
        }

        let index = self.scan();
        let located = index.get(tool_id).cloned();

        let mut cache = self.cache.write().expect("store cache lock poisoned");
        *cache = Some(index);

        located.ok_or_else(|| KernelError::UnresolvedTool(tool_id.to_string()))
    }

    /// Enumerate known tools matching a filter
    pub fn list(&self, filter: &ListFilter) -> Vec<ToolInfo> {
        self.ensure_scanned();
        let cache = self.cache.read().expect("store cache lock poisoned");
        let Some(index) = cache.as_ref() else {
            return Vec::new();
        };
        let mut tools: Vec<ToolInfo> = index
            .values()
            .filter(|located| filter.matches(&located.tool_id, &located.category))
            .map(|located| ToolInfo {
                tool_id: located.tool_id.clone(),
                category: located.category.clone(),
                version: located.version.clone(),
            })
            .collect();
        tools.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        tools
    }

    /// Forget cached locations; the next lookup rescans
    pub fn reload(&self) {
        let mut cache = self.cache.write().expect("store cache lock poisoned");
        *cache = None;
        self.extractor.clear();
        tracing::info!("Artefact store reloaded");
    }

    fn ensure_scanned(&self) {
        let scanned = {
            let cache = self.cache.read().expect("store cache lock poisoned");
            cache.is_some()
        };
        if !scanned {
            let index = self.scan();
            let mut cache = self.cache.write().expect("store cache lock poisoned");
            cache.get_or_insert(index);
        }
    }

    /// Walk every scope root, lowest precedence first, so later inserts
    /// (higher precedence) shadow earlier ones
    fn scan(&self) -> HashMap<String, Located> {
        let mut index = HashMap::new();
        for scope in Scope::PRECEDENCE.iter().rev() {
            let tools_dir = self.roots.tools_dir(*scope);
            let Ok(categories) = std::fs::read_dir(&tools_dir) else {
                continue;
            };
            for category in categories.flatten() {
                if !category.path().is_dir() {
                    continue;
                }
                let Ok(files) = std::fs::read_dir(category.path()) else {
                    continue;
                };
                for file in files.flatten() {
                    let path = file.path();
                    if SourceKind::from_path(&path).is_none() {
                        continue;
                    }
                    match self.extractor.extract(&path) {
                        Ok(manifest) => {
                            index.insert(
                                manifest.tool_id.clone(),
                                Located {
                                    tool_id: manifest.tool_id.clone(),
                                    path: path.clone(),
                                    scope: *scope,
                                    category: manifest.category.clone(),
                                    version: manifest.version.clone(),
                                },
                            );
                        }
                        Err(e) => {
                            tracing::warn!("Skipping unreadable manifest {}: {}", path.display(), e);
                        }
                    }
                }
            }
        }
        tracing::debug!("Artefact scan indexed {} tools", index.len());
        index
    }
}
