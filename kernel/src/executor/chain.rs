//! Executor chain resolution
//!
//! Walks `executor_id` links from an invoked root manifest until a primitive
//! terminates the chain. Chains are sequences, never trees: each element
//! names at most one executor, and a visited-set rejects any id appearing
//! twice. Chains are short by construction; the depth bound exists to turn
//! pathological metadata into an error instead of a long walk.

use crate::extract::Extractor;
use crate::store::ArtefactStore;
use sdk::errors::KernelError;
use sdk::manifest::ToolManifest;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Maximum chain length before resolution gives up with `NoTerminal`
pub const MAX_CHAIN_DEPTH: usize = 8;

/// One link of a resolved chain
#[derive(Debug, Clone)]
pub struct ChainElement {
    pub manifest: Arc<ToolManifest>,
    pub path: PathBuf,
}

/// An ordered, non-empty `[root, .., terminal]` sequence
///
/// Invariants, enforced at construction: the terminal is a primitive with no
/// `executor_id`, every other element's `executor_id` names its successor,
/// and no `tool_id` appears twice.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    elements: Vec<ChainElement>,
}

impl ResolvedChain {
    pub fn elements(&self) -> &[ChainElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn root(&self) -> &ChainElement {
        &self.elements[0]
    }

    pub fn terminal(&self) -> &ChainElement {
        self.elements.last().expect("chain is non-empty")
    }

    /// First runtime encountered root-to-terminal, if any
    pub fn first_runtime(&self) -> Option<&ChainElement> {
        self.elements.iter().find(|e| e.manifest.is_runtime())
    }

    /// First non-null `required_scope` root-to-terminal, if any
    pub fn required_scope(&self) -> Option<&str> {
        self.elements
            .iter()
            .find_map(|e| e.manifest.required_scope.as_deref())
    }
}

/// Resolve a tool to its terminal primitive
pub fn resolve_chain(
    store: &ArtefactStore,
    extractor: &Extractor,
    tool_id: &str,
) -> Result<ResolvedChain, KernelError> {
    let mut elements: Vec<ChainElement> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = tool_id.to_string();

    loop {
        if !visited.insert(current.clone()) {
            tracing::error!("Chain cycle at '{}' resolving '{}'", current, tool_id);
            return Err(KernelError::CyclicChain(current));
        }
        if elements.len() >= MAX_CHAIN_DEPTH {
            return Err(KernelError::NoTerminal {
                tool_id: tool_id.to_string(),
                max_depth: MAX_CHAIN_DEPTH,
            });
        }

        let located = store.locate(&current)?;
        let manifest = extractor.extract(&located.path)?;
        let next = manifest.executor_id.clone();
        elements.push(ChainElement {
            manifest,
            path: located.path,
        });

        match next {
            Some(next_id) => current = next_id,
            None => break,
        }
    }

    let terminal = elements.last().expect("loop pushed at least one element");
    if !terminal.manifest.is_primitive() {
        return Err(KernelError::MalformedChain {
            tool_id: tool_id.to_string(),
            reason: format!(
                "terminal '{}' has no executor but is not a primitive",
                terminal.manifest.tool_id
            ),
        });
    }

    tracing::debug!(
        "Resolved '{}' through {} links to '{}'",
        tool_id,
        elements.len(),
        terminal.manifest.tool_id
    );
    Ok(ResolvedChain { elements })
}
