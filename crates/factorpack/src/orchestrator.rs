//! Runs a whole build: resolve, load, factor, emit, commit

use std::{
    env, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use tempfile::NamedTempFile;

use crate::{
    config::Config,
    emitter::{Bundle, EmitOptions, emit},
    errors::EmitError,
    factoring::factor,
    graph_builder::GraphBuilder,
    layout::{OutputLayout, entry_name},
    manifest::BuildManifest,
    module_graph::ModuleId,
    reachability::compute_reachability,
    resolver::{ModuleResolver, normalize},
    types::{Bucket, EntryPoint},
};

/// What a successful build wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub outputs: Vec<OutputSummary>,
    pub module_count: usize,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSummary {
    pub bucket: Bucket,
    pub name: String,
    pub path: PathBuf,
    pub modules: Vec<ModuleId>,
}

impl BuildSummary {
    pub fn output(&self, bucket: Bucket) -> Option<&OutputSummary> {
        self.outputs.iter().find(|output| output.bucket == bucket)
    }
}

#[derive(Debug)]
pub struct BundleOrchestrator {
    config: Config,
    cwd: Option<PathBuf>,
}

impl BundleOrchestrator {
    pub fn new(config: Config) -> Self {
        Self { config, cwd: None }
    }

    /// Resolve relative entry and output paths against `cwd` instead of the
    /// process working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Run the build. Nothing is written unless every stage succeeds.
    pub fn run(&self) -> Result<BuildSummary> {
        self.config.validate()?;
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => env::current_dir().context("Failed to determine working directory")?,
        };
        // Module paths are canonical; outputs and relative paths use the same form
        let cwd = cwd.canonicalize().unwrap_or(cwd);
        let config = &self.config;

        let resolver = ModuleResolver::new(config);
        let builder = GraphBuilder::new(&resolver).with_jobs(config.jobs);

        let entry_paths: Vec<PathBuf> =
            config.entries.iter().map(|entry| entry.path.clone()).collect();
        let entry_modules = builder.resolve_entries(&entry_paths, &cwd)?;
        let graph = builder.build(&entry_modules)?;
        info!(
            "Loaded {} modules from {} entry points",
            graph.len(),
            entry_modules.len()
        );

        for cycle in graph.find_cycles() {
            let members: Vec<String> = cycle
                .iter()
                .map(|&id| graph.module(id).path.display().to_string())
                .collect();
            debug!("Circular dependency: {}", members.join(" -> "));
        }

        let entries: Vec<EntryPoint> = config
            .entries
            .iter()
            .zip(&entry_modules)
            .map(|(entry, path)| {
                let output = absolute(&cwd, &entry.output);
                let module = graph.module_id(path).with_context(|| {
                    format!("Entry {} missing from module graph", path.display())
                })?;
                Ok(EntryPoint {
                    name: entry_name(&output),
                    module,
                    output,
                })
            })
            .collect::<Result<_>>()?;

        let reachability = compute_reachability(&graph, &entries);
        let partition = factor(&graph, &entries, &reachability, config.shared_bucket_count);

        let shared_output = config
            .shared_output
            .as_deref()
            .map(|path| absolute(&cwd, path))
            .context("No shared bundle output configured")?;
        let layout = OutputLayout::new(&partition, &entries, &shared_output);

        let options = EmitOptions {
            source_maps: config.source_maps,
            root: Some(cwd.clone()),
        };
        let bundles = emit(&graph, &entries, &partition, &layout, &options)?;

        let (mut files, outputs) = collect_outputs(&layout, &bundles);

        let manifest = match &config.manifest {
            Some(path) => {
                let path = absolute(&cwd, path);
                let json =
                    BuildManifest::new(&graph, &entries, &partition, &layout, &bundles, &cwd)
                        .to_json()
                        .context("Failed to serialize build manifest")?;
                files.push((path.clone(), json));
                Some(path)
            }
            None => None,
        };

        ensure_distinct(&files)?;
        commit(&files)?;
        info!("Wrote {} files", files.len());

        Ok(BuildSummary {
            outputs,
            module_count: graph.len(),
            manifest,
        })
    }
}

/// Pair every bundle with its destination, in layout order
fn collect_outputs(
    layout: &OutputLayout,
    bundles: &IndexMap<Bucket, Bundle>,
) -> (Vec<(PathBuf, String)>, Vec<OutputSummary>) {
    let mut files = Vec::with_capacity(bundles.len() + 1);
    let mut outputs = Vec::with_capacity(bundles.len());
    for (bucket, path) in layout.iter() {
        let Some(bundle) = bundles.get(&bucket) else {
            continue;
        };
        info!(
            "{bucket} -> {} ({} modules)",
            path.display(),
            bundle.modules.len()
        );
        files.push((path.to_path_buf(), bundle.code.clone()));
        outputs.push(OutputSummary {
            bucket,
            name: bundle.name.clone(),
            path: path.to_path_buf(),
            modules: bundle.modules.clone(),
        });
    }
    (files, outputs)
}

/// `path` anchored at `cwd` with `.` and `..` collapsed, so that every
/// spelling of one destination compares equal
fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    normalize(&cwd.join(path))
}

/// Fail if two outputs share a destination
fn ensure_distinct(files: &[(PathBuf, String)]) -> Result<(), EmitError> {
    let mut seen: FxHashSet<&Path> = FxHashSet::default();
    for (path, _) in files {
        if !seen.insert(path.as_path()) {
            return Err(EmitError::DuplicateOutput { path: path.clone() });
        }
    }
    Ok(())
}

/// Write every file or none of them
///
/// Contents are staged in temporary files next to their destinations, then
/// moved into place. If a move fails, destinations written so far are removed.
pub fn commit(files: &[(PathBuf, String)]) -> Result<(), EmitError> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, content) in files {
        staged.push((path, stage(path, content)?));
    }

    let mut written: Vec<&Path> = Vec::with_capacity(staged.len());
    for (path, temp) in staged {
        if let Err(err) = temp.persist(path) {
            for done in written {
                if let Err(cleanup) = fs::remove_file(done) {
                    warn!("Failed to remove {}: {cleanup}", done.display());
                }
            }
            return Err(EmitError::Write {
                path: path.clone(),
                source: err.error,
            });
        }
        debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(())
}

fn stage(path: &Path, content: &str) -> Result<NamedTempFile, EmitError> {
    let write_error = |source: io::Error| EmitError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_error)?;
    let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
    temp.write_all(content.as_bytes()).map_err(write_error)?;
    temp.flush().map_err(write_error)?;
    Ok(temp)
}
