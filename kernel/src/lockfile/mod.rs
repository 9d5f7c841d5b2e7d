//! Lockfile store
//!
//! Reproducibility: the resolved chain of a `(tool_id, version)` root must
//! not silently change across kernel invocations. A lockfile freezes the
//! chain's shape (ids, versions, content hashes); validation compares a
//! freshly resolved chain against the frozen record entry by entry.
//!
//! Layout per scope: `<root>/.ai/lockfiles/<category>/<tool_id>@<version>.lock`
//! plus a `.index` JSON for O(1) lookup. The index is a write-through cache:
//! every mutation rewrites it via atomic rename, and a corrupt or missing
//! index is rebuilt by scanning the lock files themselves.

use crate::executor::chain::ResolvedChain;
use crate::integrity;
use crate::scopes::{Scope, ScopeRoots};
use chrono::{DateTime, Duration, Utc};
use sdk::errors::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Format version written into every lockfile
pub const LOCKFILE_VERSION: u32 = 1;

const INDEX_FILE: &str = ".index";

/// The frozen shape of one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub lockfile_version: u32,
    pub tool_id: String,
    pub version: String,
    pub category: String,
    pub generated_at: DateTime<Utc>,
    /// Hash over the serialized entries, disambiguating multiple valid
    /// chains for one root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_hash: Option<String>,
    pub entries: Vec<LockEntry>,
}

/// One frozen chain element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub tool_id: String,
    pub version: String,
    pub category: String,
    pub content_hash: String,
}

impl Lockfile {
    fn file_name(&self) -> String {
        format!("{}@{}.lock", self.tool_id, self.version)
    }

    /// Expected content hash for a chain element, if this exact
    /// `(tool_id, version)` was frozen
    ///
    /// A version drift means there is no expectation to enforce; that drift
    /// belongs to [`LockfileStore::validate`], not the integrity verifier.
    pub fn hash_for(&self, tool_id: &str, version: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.tool_id == tool_id && e.version == version)
            .map(|e| e.content_hash.as_str())
    }
}

/// Outcome of comparing a chain against a lockfile
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub mismatches: Vec<String>,
}

impl ValidationResult {
    pub fn summary(&self) -> String {
        self.mismatches.join("; ")
    }
}

/// One row of [`LockfileStore::list`]
#[derive(Debug, Clone)]
pub struct LockfileSummary {
    pub category: String,
    pub tool_id: String,
    pub version: String,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    entries: HashMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    /// Path relative to the scope's lockfiles directory
    path: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_validated_at: Option<DateTime<Utc>>,
}

fn index_key(category: &str, tool_id: &str, version: &str) -> String {
    format!("{}/{}@{}", category, tool_id, version)
}

/// Hierarchical lockfile store over the writable scopes
pub struct LockfileStore {
    roots: ScopeRoots,
    /// Serializes all index mutation and keeps loaded indices
    indices: Mutex<HashMap<Scope, Index>>,
}

impl LockfileStore {
    pub fn new(roots: ScopeRoots) -> Self {
        Self {
            roots,
            indices: Mutex::new(HashMap::new()),
        }
    }

    /// Freeze the current chain of a root tool into a lockfile
    ///
    /// Content hashes are computed from the manifest files the chain was
    /// resolved from, so a freeze always records what is on disk right now.
    pub fn freeze(&self, chain: &ResolvedChain) -> Result<Lockfile, KernelError> {
        let mut entries = Vec::with_capacity(chain.len());
        for element in chain.elements() {
            entries.push(LockEntry {
                tool_id: element.manifest.tool_id.clone(),
                version: element.manifest.version.clone(),
                category: element.manifest.category.clone(),
                content_hash: integrity::compute_file_hash(&element.path)?,
            });
        }

        let serialized = serde_json::to_vec(&entries)
            .map_err(|e| KernelError::Config(format!("failed to serialize lock entries: {}", e)))?;
        let chain_hash = format!("blake3:{}", blake3::hash(&serialized).to_hex());

        let root = chain.root();
        let lockfile = Lockfile {
            lockfile_version: LOCKFILE_VERSION,
            tool_id: root.manifest.tool_id.clone(),
            version: root.manifest.version.clone(),
            category: root.manifest.category.clone(),
            generated_at: Utc::now(),
            chain_hash: Some(chain_hash),
            entries,
        };
        tracing::info!(
            "Froze chain for '{}@{}' ({} entries)",
            lockfile.tool_id,
            lockfile.version,
            lockfile.entries.len()
        );
        Ok(lockfile)
    }

    /// Write a lockfile to a scope and update that scope's index
    pub fn save(&self, lockfile: &Lockfile, scope: Scope) -> Result<PathBuf, KernelError> {
        if !Scope::WRITABLE.contains(&scope) {
            return Err(KernelError::Config(format!(
                "lockfiles cannot be saved to the {} scope",
                scope
            )));
        }

        let dir = self.roots.lockfiles_dir(scope).join(&lockfile.category);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(lockfile.file_name());
        let body = serde_json::to_vec_pretty(lockfile)
            .map_err(|e| KernelError::Config(format!("failed to serialize lockfile: {}", e)))?;
        atomic_write(&path, &body)?;

        let mut indices = self.indices.lock().expect("lockfile index lock poisoned");
        let index = self.loaded_index(&mut indices, scope);
        index.entries.insert(
            index_key(&lockfile.category, &lockfile.tool_id, &lockfile.version),
            IndexEntry {
                path: format!("{}/{}", lockfile.category, lockfile.file_name()),
                created_at: lockfile.generated_at,
                last_validated_at: None,
            },
        );
        self.write_index(scope, &indices[&scope])?;

        tracing::info!("Saved lockfile {} ({} scope)", path.display(), scope);
        Ok(path)
    }

    /// Load the lockfile for a root, project scope winning over user scope
    pub fn load(
        &self,
        tool_id: &str,
        version: &str,
        category: &str,
    ) -> Result<Option<Lockfile>, KernelError> {
        let mut indices = self.indices.lock().expect("lockfile index lock poisoned");
        for scope in Scope::WRITABLE {
            let index = self.loaded_index(&mut indices, scope);
            let Some(entry) = index.entries.get(&index_key(category, tool_id, version)) else {
                continue;
            };
            let path = self.roots.lockfiles_dir(scope).join(&entry.path);
            match read_lockfile(&path) {
                Ok(lockfile) => return Ok(Some(lockfile)),
                Err(e) => {
                    // Stale index row; drop it and keep looking
                    tracing::warn!("Lockfile listed in index but unreadable: {}", e);
                    index
                        .entries
                        .remove(&index_key(category, tool_id, version));
                    let snapshot = indices[&scope].clone();
                    self.write_index(scope, &snapshot)?;
                }
            }
        }
        Ok(None)
    }

    /// Compare a resolved chain against a frozen lockfile
    ///
    /// Entries are compared in order on `(tool_id, version, content_hash)`;
    /// a length difference is itself a mismatch. Content hashes for the
    /// current chain are recomputed from disk.
    pub fn validate(
        &self,
        lockfile: &Lockfile,
        chain: &ResolvedChain,
    ) -> Result<ValidationResult, KernelError> {
        let mut mismatches = Vec::new();

        if lockfile.entries.len() != chain.len() {
            mismatches.push(format!(
                "chain has {} entries, lockfile froze {}",
                chain.len(),
                lockfile.entries.len()
            ));
        }

        for (position, (frozen, element)) in lockfile
            .entries
            .iter()
            .zip(chain.elements().iter())
            .enumerate()
        {
            let manifest = &element.manifest;
            if frozen.tool_id != manifest.tool_id {
                mismatches.push(format!(
                    "entry {}: tool '{}' was frozen as '{}'",
                    position, manifest.tool_id, frozen.tool_id
                ));
                continue;
            }
            if frozen.version != manifest.version {
                mismatches.push(format!(
                    "entry {} ('{}'): version {} was frozen as {}",
                    position, manifest.tool_id, manifest.version, frozen.version
                ));
            }
            let current_hash = integrity::compute_file_hash(&element.path)?;
            if !current_hash.eq_ignore_ascii_case(&frozen.content_hash) {
                mismatches.push(format!(
                    "entry {} ('{}'): content hash drifted",
                    position, manifest.tool_id
                ));
            }
        }

        let result = ValidationResult {
            ok: mismatches.is_empty(),
            mismatches,
        };
        if result.ok {
            self.mark_validated(lockfile)?;
        } else {
            tracing::warn!(
                "Lockfile drift for '{}@{}': {}",
                lockfile.tool_id,
                lockfile.version,
                result.summary()
            );
        }
        Ok(result)
    }

    /// Enumerate stored lockfiles, optionally restricted to one category
    pub fn list(&self, category: Option<&str>) -> Vec<LockfileSummary> {
        let mut indices = self.indices.lock().expect("lockfile index lock poisoned");
        let mut rows = Vec::new();
        for scope in Scope::WRITABLE {
            let index = self.loaded_index(&mut indices, scope);
            for (key, entry) in &index.entries {
                let Some((cat, rest)) = key.split_once('/') else {
                    continue;
                };
                if category.is_some_and(|want| want != cat) {
                    continue;
                }
                let Some((tool_id, version)) = rest.split_once('@') else {
                    continue;
                };
                rows.push(LockfileSummary {
                    category: cat.to_string(),
                    tool_id: tool_id.to_string(),
                    version: version.to_string(),
                    scope,
                    created_at: entry.created_at,
                    last_validated_at: entry.last_validated_at,
                });
            }
        }
        rows.sort_by(|a, b| (&a.category, &a.tool_id).cmp(&(&b.category, &b.tool_id)));
        rows
    }

    /// Delete lockfiles not validated (or created) within `max_age_days`
    ///
    /// Returns how many were removed.
    pub fn prune_stale(&self, max_age_days: u32) -> Result<usize, KernelError> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let mut removed = 0;

        let mut indices = self.indices.lock().expect("lockfile index lock poisoned");
        for scope in Scope::WRITABLE {
            let index = self.loaded_index(&mut indices, scope);
            let stale: Vec<String> = index
                .entries
                .iter()
                .filter(|(_, entry)| entry.last_validated_at.unwrap_or(entry.created_at) < cutoff)
                .map(|(key, _)| key.clone())
                .collect();
            if stale.is_empty() {
                continue;
            }
            for key in &stale {
                if let Some(entry) = index.entries.remove(key) {
                    let path = self.roots.lockfiles_dir(scope).join(&entry.path);
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::warn!("Failed to remove stale lockfile {}: {}", path.display(), e);
                    }
                    removed += 1;
                }
            }
            let snapshot = indices[&scope].clone();
            self.write_index(scope, &snapshot)?;
        }

        if removed > 0 {
            tracing::info!("Pruned {} stale lockfiles", removed);
        }
        Ok(removed)
    }

    /// Record a successful validation in whichever scope holds the lockfile
    fn mark_validated(&self, lockfile: &Lockfile) -> Result<(), KernelError> {
        let key = index_key(&lockfile.category, &lockfile.tool_id, &lockfile.version);
        let mut indices = self.indices.lock().expect("lockfile index lock poisoned");
        for scope in Scope::WRITABLE {
            let index = self.loaded_index(&mut indices, scope);
            if let Some(entry) = index.entries.get_mut(&key) {
                entry.last_validated_at = Some(Utc::now());
                let snapshot = indices[&scope].clone();
                self.write_index(scope, &snapshot)?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Get the cached index for a scope, loading or rebuilding it on first
    /// touch. The caller must hold the index mutex.
    fn loaded_index<'a>(
        &self,
        indices: &'a mut HashMap<Scope, Index>,
        scope: Scope,
    ) -> &'a mut Index {
        indices.entry(scope).or_insert_with(|| {
            let dir = self.roots.lockfiles_dir(scope);
            match std::fs::read_to_string(dir.join(INDEX_FILE)) {
                Ok(text) => match serde_json::from_str(&text) {
                    Ok(index) => index,
                    Err(e) => {
                        tracing::warn!("Corrupt lockfile index in {} scope ({}), rebuilding", scope, e);
                        rebuild_index(&dir)
                    }
                },
                Err(_) => rebuild_index(&dir),
            }
        })
    }

    fn write_index(&self, scope: Scope, index: &Index) -> Result<(), KernelError> {
        let dir = self.roots.lockfiles_dir(scope);
        std::fs::create_dir_all(&dir)?;
        let body = serde_json::to_vec_pretty(index)
            .map_err(|e| KernelError::Config(format!("failed to serialize index: {}", e)))?;
        atomic_write(&dir.join(INDEX_FILE), &body)
    }
}

/// Rebuild an index by scanning `<dir>/<category>/*.lock`
fn rebuild_index(dir: &Path) -> Index {
    let mut index = Index::default();
    let Ok(categories) = std::fs::read_dir(dir) else {
        return index;
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
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            match read_lockfile(&path) {
                Ok(lockfile) => {
                    index.entries.insert(
                        index_key(&lockfile.category, &lockfile.tool_id, &lockfile.version),
                        IndexEntry {
                            path: format!(
                                "{}/{}",
                                lockfile.category,
                                path.file_name().unwrap_or_default().to_string_lossy()
                            ),
                            created_at: lockfile.generated_at,
                            last_validated_at: None,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable lockfile {}: {}", path.display(), e);
                }
            }
        }
    }
    index
}

fn read_lockfile(path: &Path) -> Result<Lockfile, KernelError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| KernelError::Config(format!("invalid lockfile {}: {}", path.display(), e)))
}

/// Write a file via a temporary sibling and rename, so readers never see a
/// torn write
fn atomic_write(path: &Path, body: &[u8]) -> Result<(), KernelError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::chain::resolve_chain;
    use crate::extract::Extractor;
    use crate::store::ArtefactStore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dirs: Vec<TempDir>,
        roots: ScopeRoots,
        store: ArtefactStore,
        extractor: Arc<Extractor>,
        lockfiles: LockfileStore,
    }

    fn fixture() -> Fixture {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let bundled = TempDir::new().unwrap();
        let roots = ScopeRoots::new(
            project.path().to_path_buf(),
            user.path().to_path_buf(),
            bundled.path().to_path_buf(),
        );
        let extractor = Arc::new(Extractor::new());
        Fixture {
            store: ArtefactStore::new(roots.clone(), Arc::clone(&extractor)),
            lockfiles: LockfileStore::new(roots.clone()),
            roots,
            extractor,
            _dirs: vec![project, user, bundled],
        }
    }

    fn plant(f: &Fixture, name: &str, yaml: &str) -> PathBuf {
        let dir = f.roots.tools_dir(Scope::Project).join("general");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, yaml).unwrap();
        f.store.reload();
        path
    }

    fn plant_chain(f: &Fixture) {
        plant(
            f,
            "foo.yaml",
            "tool_id: foo\nversion: 1.0.0\ntool_type: user\nexecutor_id: subprocess\n",
        );
        plant(
            f,
            "subprocess.yaml",
            "tool_id: subprocess\nversion: 1.0.0\ntool_type: primitive\n",
        );
    }

    fn resolve(f: &Fixture, tool_id: &str) -> ResolvedChain {
        resolve_chain(&f.store, &f.extractor, tool_id).unwrap()
    }

    #[test]
    fn test_freeze_then_validate_ok() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");

        let lockfile = f.lockfiles.freeze(&chain).unwrap();
        assert_eq!(lockfile.lockfile_version, LOCKFILE_VERSION);
        assert_eq!(lockfile.entries.len(), 2);
        assert!(lockfile.chain_hash.is_some());

        let result = f.lockfiles.validate(&lockfile, &chain).unwrap();
        assert!(result.ok, "mismatches: {}", result.summary());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let lockfile = f.lockfiles.freeze(&chain).unwrap();

        f.lockfiles.save(&lockfile, Scope::User).unwrap();
        let loaded = f
            .lockfiles
            .load("foo", "1.0.0", "general")
            .unwrap()
            .expect("lockfile should load");
        assert_eq!(loaded.entries, lockfile.entries);
    }

    #[test]
    fn test_project_scope_wins_on_load() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");

        let mut user_lock = f.lockfiles.freeze(&chain).unwrap();
        user_lock.entries[0].version = "0.9.0-user".to_string();
        f.lockfiles.save(&user_lock, Scope::User).unwrap();

        let project_lock = f.lockfiles.freeze(&chain).unwrap();
        f.lockfiles.save(&project_lock, Scope::Project).unwrap();

        let loaded = f
            .lockfiles
            .load("foo", "1.0.0", "general")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.entries[0].version, "1.0.0");
    }

    #[test]
    fn test_validate_detects_version_drift() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let mut lockfile = f.lockfiles.freeze(&chain).unwrap();
        lockfile.entries[1].version = "2.0.0".to_string();

        let result = f.lockfiles.validate(&lockfile, &chain).unwrap();
        assert!(!result.ok);
        assert!(result.summary().contains("version"));
    }

    #[test]
    fn test_validate_detects_content_drift() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let lockfile = f.lockfiles.freeze(&chain).unwrap();

        // Rewrite the terminal manifest with different bytes
        plant(
            &f,
            "subprocess.yaml",
            "tool_id: subprocess\nversion: 1.0.0\ntool_type: primitive\ncategory: general\n",
        );
        let chain = resolve(&f, "foo");

        let result = f.lockfiles.validate(&lockfile, &chain).unwrap();
        assert!(!result.ok);
        assert!(result.summary().contains("content hash"));
    }

    #[test]
    fn test_validate_detects_length_drift() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let mut lockfile = f.lockfiles.freeze(&chain).unwrap();
        lockfile.entries.pop();

        let result = f.lockfiles.validate(&lockfile, &chain).unwrap();
        assert!(!result.ok);
    }

    #[test]
    fn test_load_absent_is_none() {
        let f = fixture();
        assert!(f
            .lockfiles
            .load("ghost", "1.0.0", "general")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupt_index_rebuilt() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let lockfile = f.lockfiles.freeze(&chain).unwrap();
        f.lockfiles.save(&lockfile, Scope::User).unwrap();

        fs::write(
            f.roots.lockfiles_dir(Scope::User).join(INDEX_FILE),
            "not json at all",
        )
        .unwrap();

        // A fresh store has to rebuild from the .lock files
        let fresh = LockfileStore::new(f.roots.clone());
        let loaded = fresh.load("foo", "1.0.0", "general").unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn test_list_and_prune() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let lockfile = f.lockfiles.freeze(&chain).unwrap();
        f.lockfiles.save(&lockfile, Scope::User).unwrap();

        let rows = f.lockfiles.list(None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tool_id, "foo");
        assert_eq!(f.lockfiles.list(Some("other")).len(), 0);

        // Nothing is older than a day
        assert_eq!(f.lockfiles.prune_stale(1).unwrap(), 0);
        // Everything is older than "in the future"; max_age 0 prunes all
        assert_eq!(f.lockfiles.prune_stale(0).unwrap(), 1);
        assert!(f.lockfiles.list(None).is_empty());
        assert!(f.lockfiles.load("foo", "1.0.0", "general").unwrap().is_none());
    }

    #[test]
    fn test_cannot_save_to_bundled() {
        let f = fixture();
        plant_chain(&f);
        let chain = resolve(&f, "foo");
        let lockfile = f.lockfiles.freeze(&chain).unwrap();
        assert!(f.lockfiles.save(&lockfile, Scope::Bundled).is_err());
    }
}
