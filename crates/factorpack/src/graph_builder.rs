//! Builds the [`ModuleGraph`] of a build by breadth-first traversal
//!
//! Traversal proceeds frontier by frontier. Every module of a frontier is
//! read, scanned and has its specifiers resolved independently, so a frontier
//! is loaded on a rayon pool. Discovery, which hands out module ids, happens
//! afterwards on the calling thread in frontier order, which keeps ids
//! identical no matter how many workers ran.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, trace};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use rustc_hash::FxHashMap;

use crate::{
    errors::{BuildError, ReadError, ResolutionError},
    extraction::{CommonJsExtractor, DependencyExtractor},
    module_graph::{ModuleGraph, ModuleId},
    resolver::ModuleResolver,
};

/// State shared by the loader workers of one build
///
/// `discovered` is the visited set: a path present here has been assigned an
/// id and is either loaded or queued. `resolutions` memoizes successful
/// resolutions per (directory, specifier).
#[derive(Debug, Default)]
pub struct TraversalContext {
    discovered: Mutex<IndexMap<PathBuf, ModuleId>>,
    resolutions: Mutex<FxHashMap<(PathBuf, String), PathBuf>>,
}

impl TraversalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `path` and whether this call discovered it
    pub fn discover(&self, path: &Path) -> (ModuleId, bool) {
        let mut discovered = self.discovered.lock();
        if let Some(&id) = discovered.get(path) {
            return (id, false);
        }
        let id = ModuleId::new(discovered.len() as u32);
        discovered.insert(path.to_path_buf(), id);
        (id, true)
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered.lock().len()
    }

    /// Resolve through the per-build cache
    pub fn resolve(
        &self,
        resolver: &ModuleResolver,
        specifier: &str,
        from: &Path,
    ) -> Result<PathBuf, ResolutionError> {
        let base_dir = from.parent().unwrap_or(from).to_path_buf();
        let key = (base_dir, specifier.to_owned());
        if let Some(cached) = self.resolutions.lock().get(&key) {
            return Ok(cached.clone());
        }

        // The lock is not held while touching the file system
        let resolved = resolver.resolve(specifier, from)?;
        self.resolutions.lock().insert(key, resolved.clone());
        Ok(resolved)
    }
}

/// A module whose source has been read and whose specifiers are resolved
#[derive(Debug)]
struct LoadedModule {
    path: PathBuf,
    source: String,
    specifiers: Vec<String>,
    resolved: Vec<(String, PathBuf)>,
    /// Filled in at discovery time, parallel to `resolved`
    dependencies: Vec<(String, ModuleId)>,
}

#[derive(Debug)]
pub struct GraphBuilder<'a> {
    resolver: &'a ModuleResolver,
    extractor: Box<dyn DependencyExtractor + 'a>,
    jobs: usize,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(resolver: &'a ModuleResolver) -> Self {
        Self {
            resolver,
            extractor: Box::new(CommonJsExtractor),
            jobs: 0,
        }
    }

    /// Replace the default `require()` scanner
    #[must_use]
    pub fn with_extractor(mut self, extractor: impl DependencyExtractor + 'a) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// Number of loader threads; 0 uses rayon's global pool, 1 loads sequentially
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Resolve user-supplied entry paths to canonical module identities
    pub fn resolve_entries(
        &self,
        entries: &[PathBuf],
        cwd: &Path,
    ) -> Result<Vec<PathBuf>, BuildError> {
        let mut resolved: Vec<PathBuf> = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = self
                .resolver
                .resolve_entry(entry, cwd)
                .map_err(BuildError::UnresolvedEntry)?;
            if resolved.contains(&path) {
                return Err(BuildError::DuplicateEntry(path));
            }
            resolved.push(path);
        }
        Ok(resolved)
    }

    /// Build the module graph reachable from `entries`
    ///
    /// Entries receive ids `0..entries.len()` in order. The first read or
    /// resolution failure aborts the build; no partial graph is returned.
    pub fn build(&self, entries: &[PathBuf]) -> Result<ModuleGraph, BuildError> {
        if entries.is_empty() {
            return Err(BuildError::NoEntries);
        }

        let pool = self.thread_pool()?;
        let context = TraversalContext::new();

        let mut frontier: Vec<PathBuf> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !context.discover(entry).1 {
                return Err(BuildError::DuplicateEntry(entry.clone()));
            }
            frontier.push(entry.clone());
        }

        let mut loaded: Vec<LoadedModule> = Vec::new();
        let mut depth = 0usize;
        while !frontier.is_empty() {
            debug!("Loading frontier {depth} with {} modules", frontier.len());
            let mut modules = self.load_frontier(&frontier, &context, pool.as_ref())?;

            frontier = Vec::new();
            for module in &mut modules {
                for (specifier, target) in &module.resolved {
                    let (id, first_seen) = context.discover(target);
                    if first_seen {
                        frontier.push(target.clone());
                    }
                    module.dependencies.push((specifier.clone(), id));
                }
            }
            loaded.extend(modules);
            depth += 1;
        }

        debug!("Discovered {} modules", context.discovered_count());
        Ok(assemble(loaded))
    }

    fn thread_pool(&self) -> Result<Option<ThreadPool>, BuildError> {
        match self.jobs {
            0 | 1 => Ok(None),
            jobs => Ok(Some(ThreadPoolBuilder::new().num_threads(jobs).build()?)),
        }
    }

    fn load_frontier(
        &self,
        frontier: &[PathBuf],
        context: &TraversalContext,
        pool: Option<&ThreadPool>,
    ) -> Result<Vec<LoadedModule>, BuildError> {
        let results: Vec<Result<LoadedModule, BuildError>> = match (self.jobs, pool) {
            (1, _) => frontier
                .iter()
                .map(|path| self.load_module(path, context))
                .collect(),
            (_, Some(pool)) => pool.install(|| {
                frontier
                    .par_iter()
                    .map(|path| self.load_module(path, context))
                    .collect()
            }),
            (_, None) => frontier
                .par_iter()
                .map(|path| self.load_module(path, context))
                .collect(),
        };

        // Report the first failure in frontier order so errors are reproducible
        results.into_iter().collect()
    }

    fn load_module(
        &self,
        path: &Path,
        context: &TraversalContext,
    ) -> Result<LoadedModule, BuildError> {
        trace!("Loading {}", path.display());
        let source = fs::read_to_string(path).map_err(|source| BuildError::Read {
            module: path.to_path_buf(),
            source: ReadError {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let specifiers = self.extractor.extract(path, &source);
        let mut resolved = Vec::with_capacity(specifiers.len());
        for specifier in &specifiers {
            let target = context
                .resolve(self.resolver, specifier, path)
                .map_err(|source| BuildError::Resolve {
                    module: path.to_path_buf(),
                    source,
                })?;
            resolved.push((specifier.clone(), target));
        }

        Ok(LoadedModule {
            path: path.to_path_buf(),
            source,
            specifiers,
            resolved,
            dependencies: Vec::new(),
        })
    }
}

/// Turn loaded modules, already in discovery order, into a graph
///
/// Discovery hands out ids in the same order modules are loaded, so the ids
/// recorded during traversal match the ones the graph assigns.
fn assemble(loaded: Vec<LoadedModule>) -> ModuleGraph {
    let mut graph = ModuleGraph::new();
    let mut pending: Vec<(ModuleId, Vec<(String, ModuleId)>)> = Vec::with_capacity(loaded.len());

    for module in loaded {
        let id = graph.add_module(module.path, module.source, module.specifiers);
        pending.push((id, module.dependencies));
    }

    for (from, dependencies) in pending {
        for (specifier, to) in dependencies {
            graph.add_dependency(from, &specifier, to);
        }
    }
    graph
}
