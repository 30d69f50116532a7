//! Build configuration
//!
//! Configuration is layered, later layers overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. the user config file (`<config dir>/factorpack/factorpack.toml`)
//! 3. `factorpack.toml` in the working directory
//! 4. a file passed with `--config`
//! 5. command-line flags
//!
//! Paths inside a config file are relative to the directory holding that file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use etcetera::BaseStrategy;
use log::debug;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use thiserror::Error;

use crate::resolver::normalize;

pub const PROJECT_CONFIG_FILE: &str = "factorpack.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One entry point and the file its exclusive bundle is written to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryConfig {
    pub path: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Extensions tried, in order, when a specifier names no existing file
    pub extensions: Vec<String>,
    /// Directory names searched upward for bare specifiers
    pub external_dirs: Vec<String>,
    /// Number of shared buckets; values above 1 split shared modules per entry combination
    pub shared_bucket_count: usize,
    /// Annotate each module with its origin path
    pub source_maps: bool,
    /// Loader threads; 0 lets rayon decide, 1 loads sequentially
    pub jobs: usize,
    pub entries: Vec<EntryConfig>,
    /// Destination of the catch-all shared bundle
    pub shared_output: Option<PathBuf>,
    /// Optional JSON build manifest
    pub manifest: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_owned(), ".json".to_owned()],
            external_dirs: vec!["node_modules".to_owned()],
            shared_bucket_count: 1,
            source_maps: false,
            jobs: 0,
            entries: Vec::new(),
            shared_output: None,
            manifest: None,
        }
    }
}

/// One configuration layer; unset fields leave the lower layer untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigLayer {
    pub extensions: Option<Vec<String>>,
    pub external_dirs: Option<Vec<String>>,
    pub shared_bucket_count: Option<usize>,
    pub source_maps: Option<bool>,
    pub jobs: Option<usize>,
    #[serde(rename = "entry")]
    pub entries: Option<Vec<EntryConfig>>,
    pub shared_output: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

impl ConfigLayer {
    /// Parse a layer from a TOML file, anchoring its paths at the file's directory
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let layer: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(layer.anchored_at(base))
    }

    /// Make every relative path in this layer relative to `base`
    pub fn anchored_at(mut self, base: &Path) -> Self {
        let anchor = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };
        if let Some(entries) = self.entries.as_mut() {
            for entry in entries {
                entry.path = anchor(std::mem::take(&mut entry.path));
                entry.output = anchor(std::mem::take(&mut entry.output));
            }
        }
        self.shared_output = self.shared_output.map(anchor);
        self.manifest = self.manifest.map(anchor);
        self
    }
}

impl Config {
    /// Load defaults, the user config, the project config and an optional explicit file
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(user_file) = user_config_file()
            && user_file.is_file()
        {
            debug!("Loading user config from {}", user_file.display());
            config.apply(ConfigLayer::from_file(&user_file)?);
        }

        let project_file = cwd.join(PROJECT_CONFIG_FILE);
        if project_file.is_file() {
            debug!("Loading project config from {}", project_file.display());
            config.apply(ConfigLayer::from_file(&project_file)?);
        }

        if let Some(explicit) = explicit {
            let explicit = if explicit.is_absolute() {
                explicit.to_path_buf()
            } else {
                cwd.join(explicit)
            };
            debug!("Loading config from {}", explicit.display());
            config.apply(ConfigLayer::from_file(&explicit)?);
        }

        Ok(config)
    }

    /// Override fields set in `layer`
    pub fn apply(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            extensions,
            external_dirs,
            shared_bucket_count,
            source_maps,
            jobs,
            entries,
            shared_output,
            manifest,
        } = layer;

        if let Some(extensions) = extensions {
            self.extensions = extensions;
        }
        if let Some(external_dirs) = external_dirs {
            self.external_dirs = external_dirs;
        }
        if let Some(count) = shared_bucket_count {
            self.shared_bucket_count = count;
        }
        if let Some(source_maps) = source_maps {
            self.source_maps = source_maps;
        }
        if let Some(jobs) = jobs {
            self.jobs = jobs;
        }
        if let Some(entries) = entries {
            self.entries = entries;
        }
        if shared_output.is_some() {
            self.shared_output = shared_output;
        }
        if manifest.is_some() {
            self.manifest = manifest;
        }
    }

    /// Check the invariants a build relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shared_bucket_count == 0 {
            return Err(ConfigError::Invalid(
                "shared-bucket-count must be at least 1".to_owned(),
            ));
        }
        if let Some(ext) = self.extensions.iter().find(|ext| !ext.starts_with('.')) {
            return Err(ConfigError::Invalid(format!(
                "extension \"{ext}\" must start with '.'"
            )));
        }
        if self.entries.is_empty() {
            return Err(ConfigError::Invalid("no entry points configured".to_owned()));
        }
        let Some(shared_output) = &self.shared_output else {
            return Err(ConfigError::Invalid(
                "no output path configured for the shared bundle".to_owned(),
            ));
        };

        // Relative and absolute spellings of one file are caught once paths are
        // anchored at the working directory, in the orchestrator
        let candidates = std::iter::once(shared_output.as_path())
            .chain(self.entries.iter().map(|entry| entry.output.as_path()))
            .chain(self.manifest.as_deref());
        let mut outputs: FxHashSet<PathBuf> = FxHashSet::default();
        for output in candidates {
            if !outputs.insert(normalize(output)) {
                return Err(ConfigError::Invalid(format!(
                    "output {} is used more than once",
                    output.display()
                )));
            }
        }
        Ok(())
    }
}

fn user_config_file() -> Option<PathBuf> {
    match etcetera::choose_base_strategy() {
        Ok(strategy) => Some(strategy.config_dir().join("factorpack").join(PROJECT_CONFIG_FILE)),
        Err(e) => {
            debug!("No user config directory: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn valid_config() -> Config {
        Config {
            entries: vec![EntryConfig {
                path: PathBuf::from("src/main.js"),
                output: PathBuf::from("dist/main.js"),
            }],
            shared_output: Some(PathBuf::from("dist/common.js")),
            ..Default::default()
        }
    }

    #[test]
    fn test_project_config_is_anchored_at_its_directory() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(
            root.join(PROJECT_CONFIG_FILE),
            r#"
shared-output = "dist/common.js"
shared-bucket-count = 2
extensions = [".js", ".mjs"]

[[entry]]
path = "src/main.js"
output = "dist/main.js"
"#,
        )?;

        let config = Config::load(None, root)?;
        assert_eq!(config.shared_bucket_count, 2);
        assert_eq!(config.extensions, vec![".js", ".mjs"]);
        assert_eq!(config.shared_output, Some(root.join("dist/common.js")));
        assert_eq!(
            config.entries,
            vec![EntryConfig {
                path: root.join("src/main.js"),
                output: root.join("dist/main.js"),
            }]
        );
        assert!(!config.source_maps);
        Ok(())
    }

    #[test]
    fn test_explicit_file_overrides_project_file() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join(PROJECT_CONFIG_FILE), "source-maps = false\njobs = 4\n")?;
        fs::write(root.join("release.toml"), "source-maps = true\n")?;

        let config = Config::load(Some(Path::new("release.toml")), root)?;
        assert!(config.source_maps);
        assert_eq!(config.jobs, 4);
        Ok(())
    }

    #[test]
    fn test_unknown_keys_are_rejected() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("bad.toml");
        fs::write(&file, "threshold = 3\n")?;

        let err = ConfigLayer::from_file(&file).expect_err("unknown key should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        let zero_buckets = Config {
            shared_bucket_count: 0,
            ..valid_config()
        };
        assert!(zero_buckets.validate().is_err());

        let bad_extension = Config {
            extensions: vec!["js".to_owned()],
            ..valid_config()
        };
        assert!(bad_extension.validate().is_err());

        let mut clashing = valid_config();
        clashing.entries.push(EntryConfig {
            path: PathBuf::from("src/admin.js"),
            output: PathBuf::from("dist/common.js"),
        });
        assert!(clashing.validate().is_err());

        let no_shared = Config {
            shared_output: None,
            ..valid_config()
        };
        assert!(no_shared.validate().is_err());
    }

    #[test]
    fn test_validate_compares_normalized_outputs() {
        let mut dotted = valid_config();
        let output = dotted.entries[0].output.clone();
        dotted.entries.push(EntryConfig {
            path: PathBuf::from("src/other.js"),
            output: Path::new(".").join(&output),
        });
        assert!(dotted.validate().is_err());

        let manifest_over_bundle = Config {
            manifest: Some(PathBuf::from("dist/../dist/common.js")),
            ..valid_config()
        };
        assert!(manifest_over_bundle.validate().is_err());

        let separate_manifest = Config {
            manifest: Some(PathBuf::from("dist/manifest.json")),
            ..valid_config()
        };
        assert!(separate_manifest.validate().is_ok());
    }
}
