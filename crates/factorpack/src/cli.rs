//! Command-line interface

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::config::{ConfigError, ConfigLayer, EntryConfig};

/// Bundle several JavaScript entry points, moving modules they share into a common bundle
#[derive(Debug, Parser)]
#[command(name = "factorpack", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file, applied over `factorpack.toml` in the working directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Entry point; repeat for every bundle
    #[arg(short, long = "entry", value_name = "ENTRY")]
    pub entries: Vec<PathBuf>,

    /// Output file of the entry at the same position
    #[arg(short, long = "output", value_name = "OUT")]
    pub outputs: Vec<PathBuf>,

    /// Output file for modules shared by two or more entries
    #[arg(long, value_name = "FILE")]
    pub common: Option<PathBuf>,

    /// Extension tried when resolving a specifier; repeat to give several, in order
    #[arg(long = "extension", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Number of shared bundles; above 1, entry combinations get bundles of their own
    #[arg(long, value_name = "N")]
    pub shared_buckets: Option<usize>,

    /// Annotate every module with the path it came from
    #[arg(long)]
    pub source_maps: bool,

    /// Loader threads (0 picks one per core, 1 disables parallel loading)
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Write a JSON manifest of the outputs
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// The configuration layer set by flags; only given flags override config files
    pub fn config_layer(&self) -> Result<ConfigLayer, ConfigError> {
        if self.entries.len() != self.outputs.len() {
            return Err(ConfigError::Invalid(format!(
                "got {} entries but {} outputs; pass one --output per --entry",
                self.entries.len(),
                self.outputs.len()
            )));
        }

        let entries = (!self.entries.is_empty()).then(|| {
            self.entries
                .iter()
                .zip(&self.outputs)
                .map(|(path, output)| EntryConfig {
                    path: path.clone(),
                    output: output.clone(),
                })
                .collect()
        });

        Ok(ConfigLayer {
            extensions: (!self.extensions.is_empty()).then(|| self.extensions.clone()),
            external_dirs: None,
            shared_bucket_count: self.shared_buckets,
            source_maps: self.source_maps.then_some(true),
            jobs: self.jobs,
            entries,
            shared_output: self.common.clone(),
            manifest: self.manifest.clone(),
        })
    }
}
