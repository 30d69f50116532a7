//! Output file locations for each bucket

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use crate::{
    factoring::Partition,
    types::{Bucket, EntryIndex, EntryPoint},
};

/// Where every bucket of a partition is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    paths: IndexMap<Bucket, PathBuf>,
}

impl OutputLayout {
    /// Entry buckets go to their entry's output, the catch-all shared bucket to
    /// `shared_output`, and combination buckets next to it as
    /// `<stem>.<entry>+<entry>.<ext>`.
    ///
    /// Entry names need not be unique (`a/main.js` and `b/main.js` are both
    /// `main`). A combination whose name-based file is already taken is named
    /// after entry indices instead, with a numeric suffix if that is taken too.
    pub fn new(partition: &Partition, entries: &[EntryPoint], shared_output: &Path) -> Self {
        let mut taken: FxHashSet<PathBuf> =
            entries.iter().map(|entry| entry.output.clone()).collect();
        taken.insert(shared_output.to_path_buf());

        let paths = partition
            .buckets()
            .map(|(bucket, _)| {
                let path = match bucket {
                    Bucket::Entry(index) => entries[index].output.clone(),
                    Bucket::Shared(index) => {
                        let combination = partition
                            .shared_bucket(index)
                            .and_then(|shared| shared.combination.as_deref());
                        match combination {
                            Some(combination) => {
                                let path =
                                    combination_path(shared_output, combination, entries, &taken);
                                taken.insert(path.clone());
                                path
                            }
                            None => shared_output.to_path_buf(),
                        }
                    }
                };
                (bucket, path)
            })
            .collect();
        Self { paths }
    }

    pub fn path(&self, bucket: Bucket) -> Option<&Path> {
        self.paths.get(&bucket).map(PathBuf::as_path)
    }

    /// File name of a bucket's output, used in bundle headers
    pub fn file_name(&self, bucket: Bucket) -> String {
        self.path(bucket)
            .and_then(Path::file_name)
            .map_or_else(|| bucket.to_string(), |name| name.to_string_lossy().into_owned())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &Path)> {
        self.paths.iter().map(|(bucket, path)| (*bucket, path.as_path()))
    }
}

fn combination_path(
    shared_output: &Path,
    combination: &[EntryIndex],
    entries: &[EntryPoint],
    taken: &FxHashSet<PathBuf>,
) -> PathBuf {
    let names = combination
        .iter()
        .map(|&index| entries[index].name.as_str())
        .collect::<Vec<_>>()
        .join("+");
    let path = combination_file(shared_output, &names);
    if !taken.contains(&path) {
        return path;
    }

    let indices = combination
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("+");
    let mut label = indices.clone();
    let mut suffix = 1;
    loop {
        let path = combination_file(shared_output, &label);
        if !taken.contains(&path) {
            return path;
        }
        suffix += 1;
        label = format!("{indices}.{suffix}");
    }
}

fn combination_file(shared_output: &Path, label: &str) -> PathBuf {
    let stem = shared_output
        .file_stem()
        .map_or_else(|| "common".to_owned(), |s| s.to_string_lossy().into_owned());
    let file_name = match shared_output.extension() {
        Some(ext) => format!("{stem}.{label}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{label}"),
    };
    shared_output.with_file_name(file_name)
}

/// Bundle name for an entry, taken from its output file stem
pub fn entry_name(output: &Path) -> String {
    output
        .file_stem()
        .map_or_else(|| "bundle".to_owned(), |stem| stem.to_string_lossy().into_owned())
}
