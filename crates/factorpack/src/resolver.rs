use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use log::{debug, trace, warn};
use serde::Deserialize;

use crate::{config::Config, errors::ResolutionError};

/// One step of the resolution algorithm
///
/// Steps are tried in [`ResolutionStrategy::ORDER`]; the first one yielding an
/// existing file wins. Every step is a pure function of the request and the
/// current state of the file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// The path exactly as written (`./util.js`)
    ExactPath,
    /// The path plus each configured extension (`./util` -> `./util.js`)
    WithExtension,
    /// A directory's `package.json` main field, then `index` + extension
    DirectoryIndex,
    /// Bare specifiers, searched upward through external package directories
    ExternalPackages,
}

impl ResolutionStrategy {
    pub const ORDER: [Self; 4] = [
        Self::ExactPath,
        Self::WithExtension,
        Self::DirectoryIndex,
        Self::ExternalPackages,
    ];

    fn applies_to(self, kind: SpecifierKind) -> bool {
        match self {
            Self::ExternalPackages => kind == SpecifierKind::Bare,
            _ => kind == SpecifierKind::Path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// Relative (`./x`, `../x`) or absolute
    Path,
    /// Package name, optionally with a subpath (`lodash/fp`)
    Bare,
}

impl SpecifierKind {
    pub fn of(specifier: &str) -> Self {
        let is_relative = specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../");
        if is_relative || Path::new(specifier).is_absolute() {
            Self::Path
        } else {
            Self::Bare
        }
    }
}

/// The subset of `package.json` the resolver cares about
#[derive(Debug, Deserialize)]
struct PackageManifest {
    main: Option<String>,
}

/// A single resolution attempt: where to look, and every path tried so far
struct Request<'a> {
    specifier: &'a str,
    base_dir: &'a Path,
    attempted: Vec<PathBuf>,
}

impl Request<'_> {
    fn try_file(&mut self, candidate: PathBuf) -> Option<PathBuf> {
        trace!("Probing {}", candidate.display());
        let found = candidate.is_file().then(|| candidate.clone());
        self.attempted.push(candidate);
        found
    }

    fn target(&self) -> PathBuf {
        normalize(&self.base_dir.join(self.specifier))
    }
}

/// Maps module specifiers to canonical files on disk
///
/// The resolver holds no cache: callers that resolve the same specifier from
/// the same directory repeatedly are expected to memoize results themselves.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    extensions: Vec<String>,
    external_dirs: Vec<String>,
}

impl ModuleResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            extensions: config.extensions.clone(),
            external_dirs: config.external_dirs.clone(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Resolve `specifier` as referenced from the module at `from`
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolutionError> {
        let base_dir = from.parent().unwrap_or_else(|| Path::new("/"));
        self.resolve_in_dir(specifier, base_dir)
            .map_err(|attempted| ResolutionError {
                specifier: specifier.to_owned(),
                from: from.to_path_buf(),
                attempted,
            })
    }

    /// Resolve an entry point path given on the command line or in a config file
    pub fn resolve_entry(&self, entry: &Path, cwd: &Path) -> Result<PathBuf, ResolutionError> {
        let absolute = if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            cwd.join(entry)
        };
        let specifier = absolute.to_string_lossy();
        self.resolve_in_dir(&specifier, cwd)
            .map_err(|attempted| ResolutionError {
                specifier: entry.display().to_string(),
                from: cwd.to_path_buf(),
                attempted,
            })
    }

    /// Resolve `specifier` relative to `base_dir`; on failure, return every path tried
    pub fn resolve_in_dir(
        &self,
        specifier: &str,
        base_dir: &Path,
    ) -> Result<PathBuf, Vec<PathBuf>> {
        let kind = SpecifierKind::of(specifier);
        let mut request = Request {
            specifier,
            base_dir,
            attempted: Vec::new(),
        };

        for strategy in ResolutionStrategy::ORDER {
            if !strategy.applies_to(kind) {
                continue;
            }
            if let Some(found) = self.apply(strategy, &mut request) {
                debug!("Resolved '{specifier}' via {strategy:?} to {}", found.display());
                return Ok(canonicalize_path(found));
            }
        }
        Err(request.attempted)
    }

    fn apply(&self, strategy: ResolutionStrategy, request: &mut Request<'_>) -> Option<PathBuf> {
        match strategy {
            ResolutionStrategy::ExactPath => exact_path(&request.target(), request),
            ResolutionStrategy::WithExtension => {
                self.with_extension(&request.target(), request)
            }
            ResolutionStrategy::DirectoryIndex => {
                self.directory_index(&request.target(), request)
            }
            ResolutionStrategy::ExternalPackages => self.external_packages(request),
        }
    }

    /// Steps (a)-(c) against a concrete path
    fn resolve_as_path(&self, target: &Path, request: &mut Request<'_>) -> Option<PathBuf> {
        exact_path(target, request)
            .or_else(|| self.with_extension(target, request))
            .or_else(|| self.directory_index(target, request))
    }

    fn with_extension(&self, target: &Path, request: &mut Request<'_>) -> Option<PathBuf> {
        let file_name = target.file_name()?.to_string_lossy().into_owned();
        self.extensions.iter().find_map(|ext| {
            request.try_file(target.with_file_name(format!("{file_name}{ext}")))
        })
    }

    fn directory_index(&self, dir: &Path, request: &mut Request<'_>) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }

        if let Some(main) = read_package_main(dir) {
            let main_target = normalize(&dir.join(&main));
            let from_main = exact_path(&main_target, request)
                .or_else(|| self.with_extension(&main_target, request))
                .or_else(|| self.index_file(&main_target, request));
            if from_main.is_some() {
                return from_main;
            }
            debug!(
                "package.json main \"{main}\" in {} does not resolve, falling back to index",
                dir.display()
            );
        }

        self.index_file(dir, request)
    }

    fn index_file(&self, dir: &Path, request: &mut Request<'_>) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }
        self.extensions
            .iter()
            .find_map(|ext| request.try_file(dir.join(format!("index{ext}"))))
    }

    fn external_packages(&self, request: &mut Request<'_>) -> Option<PathBuf> {
        let specifier = request.specifier;
        for ancestor in request.base_dir.ancestors() {
            // Never search inside `node_modules/node_modules`
            if ancestor
                .file_name()
                .is_some_and(|name| self.external_dirs.iter().any(|dir| name == dir.as_str()))
            {
                continue;
            }
            for external_dir in &self.external_dirs {
                let package_root = ancestor.join(external_dir);
                if !package_root.is_dir() {
                    continue;
                }
                let target = normalize(&package_root.join(specifier));
                if let Some(found) = self.resolve_as_path(&target, request) {
                    return Some(found);
                }
            }
        }
        None
    }
}

fn exact_path(target: &Path, request: &mut Request<'_>) -> Option<PathBuf> {
    if target.extension().is_none() {
        return None;
    }
    request.try_file(target.to_path_buf())
}

fn read_package_main(dir: &Path) -> Option<String> {
    let manifest_path = dir.join("package.json");
    let content = fs::read_to_string(&manifest_path).ok()?;
    match serde_json::from_str::<PackageManifest>(&content) {
        Ok(manifest) => manifest.main.filter(|main| !main.is_empty()),
        Err(e) => {
            warn!("Ignoring malformed {}: {e}", manifest_path.display());
            None
        }
    }
}

/// Lexically collapse `.` and `..` components
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Canonicalize a path, handling errors gracefully
fn canonicalize_path(path: PathBuf) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) => {
            // Log warning but don't fail - return the original path
            warn!("Failed to canonicalize path {}: {}", path.display(), e);
            path
        }
    }
}
