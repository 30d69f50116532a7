//! Factoring engine: assigns every module to exactly one bucket
//!
//! A module reached by a single entry goes to that entry's exclusive bucket.
//! A module reached by two or more entries goes to a shared bucket. With one
//! shared bucket (the default) all of them land in the catch-all
//! `Shared(0)`; with more, shared modules are grouped by the exact set of
//! entries reaching them and the first `count - 1` groups get buckets of
//! their own.
//!
//! Within a bucket modules are ordered by id, i.e. by first discovery.

use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHashMap;

use crate::{
    module_graph::{ModuleGraph, ModuleId},
    reachability::ReachabilitySet,
    types::{Bucket, EntryIndex, EntryPoint},
};

/// Metadata for one shared bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedBucket {
    /// Entries reaching every module of this bucket; `None` for the catch-all bucket
    pub combination: Option<Vec<EntryIndex>>,
    /// Entries that must load this bucket before their own bundle
    pub loaded_by: Vec<EntryIndex>,
}

/// The result of factoring: a disjoint cover of every reachable module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Entry buckets first, in entry order, then shared buckets
    buckets: IndexMap<Bucket, Vec<ModuleId>>,
    assignment: FxHashMap<ModuleId, Bucket>,
    shared: Vec<SharedBucket>,
}

impl Partition {
    /// Every bucket with its modules, entry buckets first
    pub fn buckets(&self) -> impl Iterator<Item = (Bucket, &[ModuleId])> {
        self.buckets
            .iter()
            .map(|(bucket, modules)| (*bucket, modules.as_slice()))
    }

    pub fn modules(&self, bucket: Bucket) -> &[ModuleId] {
        self.buckets.get(&bucket).map_or(&[], Vec::as_slice)
    }

    pub fn bucket_of(&self, module: ModuleId) -> Option<Bucket> {
        self.assignment.get(&module).copied()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn module_count(&self) -> usize {
        self.assignment.len()
    }

    pub fn shared_buckets(&self) -> &[SharedBucket] {
        &self.shared
    }

    pub fn shared_bucket(&self, index: usize) -> Option<&SharedBucket> {
        self.shared.get(index)
    }

    /// Shared buckets `entry` depends on, in load order
    pub fn required_shared(&self, entry: EntryIndex) -> Vec<Bucket> {
        self.shared
            .iter()
            .enumerate()
            .filter(|(_, shared)| shared.loaded_by.contains(&entry))
            .map(|(index, _)| Bucket::Shared(index))
            .collect()
    }
}

/// Partition the graph's modules into exclusive and shared buckets
///
/// `shared_bucket_count` below 1 is treated as 1.
pub fn factor(
    graph: &ModuleGraph,
    entries: &[EntryPoint],
    reachability: &ReachabilitySet,
    shared_bucket_count: usize,
) -> Partition {
    let mut buckets: IndexMap<Bucket, Vec<ModuleId>> = (0..entries.len())
        .map(|entry| (Bucket::Entry(entry), Vec::new()))
        .collect();
    buckets.insert(Bucket::COMMON, Vec::new());

    // Shared modules grouped by the entries reaching them, groups in order of first module
    let mut combinations: IndexMap<Vec<EntryIndex>, Vec<ModuleId>> = IndexMap::new();

    for module in graph.modules() {
        let reached_by = reachability.entries_reaching(module.id);
        match reached_by.as_slice() {
            [] => {}
            [only] => buckets
                .entry(Bucket::Entry(*only))
                .or_default()
                .push(module.id),
            _ => combinations.entry(reached_by).or_default().push(module.id),
        }
    }

    let dedicated = shared_bucket_count.max(1) - 1;
    let all_entries: Vec<EntryIndex> = (0..entries.len()).collect();
    let mut shared = vec![SharedBucket {
        combination: None,
        loaded_by: all_entries,
    }];

    for (rank, (combination, modules)) in combinations.into_iter().enumerate() {
        if rank < dedicated {
            let index = shared.len();
            debug!(
                "Shared bucket {index} for entries {combination:?} holds {} modules",
                modules.len()
            );
            buckets.insert(Bucket::Shared(index), modules);
            shared.push(SharedBucket {
                loaded_by: combination.clone(),
                combination: Some(combination),
            });
        } else {
            buckets.entry(Bucket::COMMON).or_default().extend(modules);
        }
    }

    if let Some(common) = buckets.get_mut(&Bucket::COMMON) {
        common.sort_unstable();
    }

    let assignment = buckets
        .iter()
        .flat_map(|(bucket, modules)| modules.iter().map(move |id| (*id, *bucket)))
        .collect();

    Partition {
        buckets,
        assignment,
        shared,
    }
}
