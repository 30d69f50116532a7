//! Error taxonomy for a build
//!
//! Every error is terminal for the build that raised it: nothing here is
//! retried, and the orchestrator writes no output once one has occurred.

use std::{io, path::PathBuf};

use thiserror::Error;

/// A specifier could not be mapped to an existing file
#[derive(Debug, Error)]
#[error(
    "cannot resolve \"{specifier}\" from {importer}{tried}",
    importer = .from.display(),
    tried = format_attempted(.attempted)
)]
pub struct ResolutionError {
    /// The specifier as written in the referencing module
    pub specifier: String,
    /// The referencing module (or the working directory for entry points)
    pub from: PathBuf,
    /// Every candidate path tried, in order
    pub attempted: Vec<PathBuf>,
}

fn format_attempted(attempted: &[PathBuf]) -> String {
    attempted.iter().fold(String::new(), |mut out, path| {
        out.push_str("\n  tried ");
        out.push_str(&path.display().to_string());
        out
    })
}

/// A resolved module exists but its source could not be read
#[derive(Debug, Error)]
#[error("cannot read {}", .path.display())]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Failure while constructing the module graph
#[derive(Debug, Error)]
pub enum BuildError {
    /// A dependency of `module` could not be resolved
    #[error("failed to build module graph at {}", .module.display())]
    Resolve {
        module: PathBuf,
        #[source]
        source: ResolutionError,
    },

    /// `module` could not be read
    #[error("failed to load module {}", .module.display())]
    Read {
        module: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error("failed to resolve entry point")]
    UnresolvedEntry(#[source] ResolutionError),

    #[error("entry point {} is listed more than once", .0.display())]
    DuplicateEntry(PathBuf),

    #[error("no entry points given")]
    NoEntries,

    #[error("failed to start module loader pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl BuildError {
    /// The resolution failure behind this error, if any
    pub fn resolution_error(&self) -> Option<&ResolutionError> {
        match self {
            Self::Resolve { source, .. } | Self::UnresolvedEntry(source) => Some(source),
            _ => None,
        }
    }
}

/// Failure while rendering or writing bundles
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("{} is not valid JSON", .module.display())]
    InvalidJson {
        module: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Two outputs of one build share a destination
    #[error("{} would be written more than once", .path.display())]
    DuplicateOutput { path: PathBuf },
}
