//! Module-level dependency graph for a single build
//!
//! Modules are keyed by canonical path and numbered in the order they were
//! registered. The graph builder registers modules in discovery order, so a
//! module's id doubles as its first-discovery rank, which is what every later
//! stage uses to order its output.
//!
//! Cycles are allowed. Nothing here sorts the graph topologically; cycle
//! information is exposed for diagnostics only.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;
use petgraph::{
    algo::{is_cyclic_directed, tarjan_scc},
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Unique identifier for a module, stable within one build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value of the ModuleId
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single source file taking part in the build
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// Canonical absolute path
    pub path: PathBuf,
    pub source: String,
    /// Dependency specifiers in source order, deduplicated
    pub specifiers: Vec<String>,
    /// Specifier -> resolved module, in source order
    pub resolved: IndexMap<String, ModuleId>,
    /// SHA-256 of `source`, hex-encoded
    pub content_hash: String,
}

impl Module {
    /// Distinct dependency targets in source order
    pub fn dependencies(&self) -> impl Iterator<Item = ModuleId> + '_ {
        let mut seen = Vec::with_capacity(self.resolved.len());
        self.resolved.values().copied().filter(move |id| {
            if seen.contains(id) {
                false
            } else {
                seen.push(*id);
                true
            }
        })
    }

    pub fn is_json(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }
}

/// A directed reference from one module to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: ModuleId,
    pub specifier: String,
    pub to: ModuleId,
}

/// All modules of a build plus the references between them
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Modules indexed by `ModuleId`
    modules: Vec<Module>,
    /// Canonical path to ID mapping
    module_paths: FxHashMap<PathBuf, ModuleId>,
    /// Every specifier-level reference, in registration order
    edges: Vec<DependencyEdge>,
    /// Petgraph mirror for graph algorithms, one edge per (from, to) pair
    graph: DiGraph<ModuleId, ()>,
    node_indices: Vec<NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, returning the existing id if the path is already known
    pub fn add_module(
        &mut self,
        path: PathBuf,
        source: String,
        specifiers: Vec<String>,
    ) -> ModuleId {
        if let Some(&existing) = self.module_paths.get(&path) {
            return existing;
        }

        let id = ModuleId::new(self.modules.len() as u32);
        let content_hash = hash_source(&source);
        debug!("Registered module {id} for {}", path.display());

        self.module_paths.insert(path.clone(), id);
        self.node_indices.push(self.graph.add_node(id));
        self.modules.push(Module {
            id,
            path,
            source,
            specifiers,
            resolved: IndexMap::new(),
            content_hash,
        });
        id
    }

    /// Record that `from` refers to `to` through `specifier`
    pub fn add_dependency(&mut self, from: ModuleId, specifier: &str, to: ModuleId) {
        let module = &mut self.modules[from.index()];
        if module.resolved.contains_key(specifier) {
            return;
        }
        module.resolved.insert(specifier.to_owned(), to);

        self.edges.push(DependencyEdge {
            from,
            specifier: specifier.to_owned(),
            to,
        });

        let (from_idx, to_idx) = (self.node_indices[from.index()], self.node_indices[to.index()]);
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.index())
    }

    pub fn module_id(&self, path: &Path) -> Option<ModuleId> {
        self.module_paths.get(path).copied()
    }

    /// Modules in id order
    pub fn modules(&self) -> impl ExactSizeIterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Distinct modules that `id` depends on, in source order
    pub fn dependencies(&self, id: ModuleId) -> Vec<ModuleId> {
        self.module(id).dependencies().collect()
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Groups of modules that reference each other, smallest id first in each group
    pub fn find_cycles(&self) -> Vec<Vec<ModuleId>> {
        let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&node| self.graph.contains_edge(node, node))
            })
            .map(|component| {
                let mut ids: Vec<ModuleId> = component.into_iter().map(|n| self.graph[n]).collect();
                ids.sort_unstable();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }
}

fn hash_source(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(graph: &mut ModuleGraph, name: &str) -> ModuleId {
        graph.add_module(PathBuf::from(format!("/src/{name}.js")), String::new(), Vec::new())
    }

    #[test]
    fn test_ids_follow_registration_order() {
        let mut graph = ModuleGraph::new();
        let main = add(&mut graph, "main");
        let utils = add(&mut graph, "utils");

        assert_eq!(main.as_u32(), 0);
        assert_eq!(utils.as_u32(), 1);
        assert_eq!(add(&mut graph, "main"), main);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.module_id(Path::new("/src/utils.js")), Some(utils));
    }

    #[test]
    fn test_specifiers_collapse_to_one_graph_edge() {
        let mut graph = ModuleGraph::new();
        let main = add(&mut graph, "main");
        let utils = add(&mut graph, "utils");

        graph.add_dependency(main, "./utils", utils);
        graph.add_dependency(main, "./utils.js", utils);
        graph.add_dependency(main, "./utils", utils);

        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.dependencies(main), vec![utils]);
        assert_eq!(graph.module(main).resolved.len(), 2);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let mut graph = ModuleGraph::new();
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        let c = add(&mut graph, "c");
        let d = add(&mut graph, "d");

        graph.add_dependency(a, "./b", b);
        graph.add_dependency(b, "./c", c);
        graph.add_dependency(c, "./a", a);
        graph.add_dependency(c, "./d", d);

        assert!(graph.has_cycles());
        assert_eq!(graph.find_cycles(), vec![vec![a, b, c]]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let mut graph = ModuleGraph::new();
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        graph.add_dependency(a, "./b", b);

        assert!(!graph.has_cycles());
        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let mut graph = ModuleGraph::new();
        let id = graph.add_module(PathBuf::from("/src/a.js"), String::new(), Vec::new());
        assert_eq!(
            graph.module(id).content_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
