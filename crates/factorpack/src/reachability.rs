//! Per-entry reachability over the module graph

use std::collections::VecDeque;

use indexmap::IndexSet;
use log::trace;

use crate::{
    module_graph::{ModuleGraph, ModuleId},
    types::{EntryIndex, EntryPoint},
};

/// For each entry point, every module reachable from it (the entry included)
///
/// Sets keep breadth-first visiting order; membership, not order, is what the
/// factoring engine relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachabilitySet {
    per_entry: Vec<IndexSet<ModuleId>>,
}

impl ReachabilitySet {
    pub fn entry_count(&self) -> usize {
        self.per_entry.len()
    }

    pub fn for_entry(&self, entry: EntryIndex) -> Option<&IndexSet<ModuleId>> {
        self.per_entry.get(entry)
    }

    pub fn reaches(&self, entry: EntryIndex, module: ModuleId) -> bool {
        self.per_entry
            .get(entry)
            .is_some_and(|set| set.contains(&module))
    }

    /// The entries reaching `module`, in ascending order
    pub fn entries_reaching(&self, module: ModuleId) -> Vec<EntryIndex> {
        self.per_entry
            .iter()
            .enumerate()
            .filter(|(_, set)| set.contains(&module))
            .map(|(entry, _)| entry)
            .collect()
    }
}

/// Breadth-first traversal from every entry point, O(V + E) per entry
pub fn compute_reachability(graph: &ModuleGraph, entries: &[EntryPoint]) -> ReachabilitySet {
    let per_entry = entries
        .iter()
        .map(|entry| {
            let reached = reachable_from(graph, entry.module);
            trace!("Entry '{}' reaches {} modules", entry.name, reached.len());
            reached
        })
        .collect();
    ReachabilitySet { per_entry }
}

fn reachable_from(graph: &ModuleGraph, start: ModuleId) -> IndexSet<ModuleId> {
    let mut visited = IndexSet::new();
    let mut queue = VecDeque::from([start]);
    visited.insert(start);

    while let Some(current) = queue.pop_front() {
        for dependency in graph.module(current).dependencies() {
            if visited.insert(dependency) {
                queue.push_back(dependency);
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    fn add(graph: &mut ModuleGraph, name: &str) -> ModuleId {
        graph.add_module(PathBuf::from(format!("/src/{name}.js")), String::new(), Vec::new())
    }

    fn entry(name: &str, module: ModuleId) -> EntryPoint {
        EntryPoint {
            name: name.to_owned(),
            module,
            output: PathBuf::from(format!("/dist/{name}.js")),
        }
    }

    #[test]
    fn test_overlapping_entries() {
        let mut graph = ModuleGraph::new();
        let e1 = add(&mut graph, "e1");
        let e2 = add(&mut graph, "e2");
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        let c = add(&mut graph, "c");
        graph.add_dependency(e1, "./a", a);
        graph.add_dependency(e1, "./b", b);
        graph.add_dependency(e2, "./b", b);
        graph.add_dependency(e2, "./c", c);

        let reach = compute_reachability(&graph, &[entry("e1", e1), entry("e2", e2)]);

        assert_eq!(reach.entry_count(), 2);
        assert_eq!(
            reach.for_entry(0).map(|s| s.iter().copied().collect::<Vec<_>>()),
            Some(vec![e1, a, b])
        );
        assert_eq!(reach.entries_reaching(b), vec![0, 1]);
        assert_eq!(reach.entries_reaching(a), vec![0]);
        assert!(!reach.reaches(1, a));
        assert!(reach.reaches(1, c));
    }

    #[test]
    fn test_entry_without_dependencies_is_singleton() {
        let mut graph = ModuleGraph::new();
        let lonely = add(&mut graph, "lonely");

        let reach = compute_reachability(&graph, &[entry("lonely", lonely)]);
        assert_eq!(reach.for_entry(0).map(IndexSet::len), Some(1));
        assert!(reach.reaches(0, lonely));
    }

    #[test]
    fn test_cycle_back_to_entry() {
        let mut graph = ModuleGraph::new();
        let main = add(&mut graph, "main");
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        graph.add_dependency(main, "./a", a);
        graph.add_dependency(a, "./b", b);
        graph.add_dependency(b, "./main", main);

        let reach = compute_reachability(&graph, &[entry("main", main)]);
        assert_eq!(reach.for_entry(0).map(IndexSet::len), Some(3));
    }

    #[test]
    fn test_one_entry_reaching_another() {
        let mut graph = ModuleGraph::new();
        let app = add(&mut graph, "app");
        let widget = add(&mut graph, "widget");
        graph.add_dependency(app, "./widget", widget);

        let reach = compute_reachability(&graph, &[entry("app", app), entry("widget", widget)]);
        assert_eq!(reach.entries_reaching(widget), vec![0, 1]);
        assert_eq!(reach.entries_reaching(app), vec![0]);
    }
}
