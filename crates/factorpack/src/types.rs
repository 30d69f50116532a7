//! Shared type definitions for the factorpack crate
//!
//! Entry points and bucket identifiers are used by every stage after graph
//! construction, so they live here to keep the stage modules independent.

use std::{fmt, path::PathBuf};

use serde::Serialize;

use crate::module_graph::ModuleId;

/// Position of an entry point in the user-supplied entry list
pub type EntryIndex = usize;

/// A module designated as the root of one output bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Bundle name, derived from the output file stem (e.g. `main` for `dist/main.js`)
    pub name: String,
    /// The entry module
    pub module: ModuleId,
    /// Destination of the entry's exclusive bundle
    pub output: PathBuf,
}

/// A named partition of modules destined for one output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum Bucket {
    /// Modules reachable from exactly one entry
    Entry(EntryIndex),
    /// Modules reachable from two or more entries.
    ///
    /// `Shared(0)` is the catch-all shared bucket and always exists.
    Shared(usize),
}

impl Bucket {
    /// The catch-all shared bucket
    pub const COMMON: Self = Self::Shared(0);

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    pub fn entry_index(&self) -> Option<EntryIndex> {
        match self {
            Self::Entry(index) => Some(*index),
            Self::Shared(_) => None,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry(index) => write!(f, "entry#{index}"),
            Self::Shared(0) => write!(f, "common"),
            Self::Shared(index) => write!(f, "common#{index}"),
        }
    }
}
