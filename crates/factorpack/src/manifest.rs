//! JSON description of a build's outputs

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    emitter::Bundle,
    factoring::Partition,
    layout::OutputLayout,
    module_graph::{ModuleGraph, ModuleId},
    types::{Bucket, EntryPoint},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildManifest {
    pub outputs: Vec<OutputRecord>,
}

/// One written bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub file: PathBuf,
    #[serde(flatten)]
    pub bucket: Bucket,
    /// Entry name for entry bundles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Entries loading this bundle, for shared bundles
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
    /// Shared files that must be loaded before this one, for entry bundles
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub load_after: Vec<PathBuf>,
    pub modules: Vec<ModuleRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub path: PathBuf,
    pub hash: String,
}

impl BuildManifest {
    /// Describe `bundles`; paths are made relative to `root` where possible
    pub fn new(
        graph: &ModuleGraph,
        entries: &[EntryPoint],
        partition: &Partition,
        layout: &OutputLayout,
        bundles: &IndexMap<Bucket, Bundle>,
        root: &Path,
    ) -> Self {
        let relative = |path: &Path| path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let output_of = |bucket: Bucket| {
            layout
                .path(bucket)
                .map_or_else(|| PathBuf::from(bucket.to_string()), relative)
        };

        let outputs = bundles
            .values()
            .map(|bundle| {
                let (entry, loaders, load_after) = match bundle.bucket {
                    Bucket::Entry(index) => (
                        Some(entries[index].name.clone()),
                        Vec::new(),
                        partition
                            .required_shared(index)
                            .into_iter()
                            .map(output_of)
                            .collect(),
                    ),
                    Bucket::Shared(index) => (
                        None,
                        partition
                            .shared_bucket(index)
                            .map(|shared| {
                                shared
                                    .loaded_by
                                    .iter()
                                    .map(|&entry| entries[entry].name.clone())
                                    .collect()
                            })
                            .unwrap_or_default(),
                        Vec::new(),
                    ),
                };

                OutputRecord {
                    file: output_of(bundle.bucket),
                    bucket: bundle.bucket,
                    entry,
                    entries: loaders,
                    load_after,
                    modules: bundle
                        .modules
                        .iter()
                        .map(|&id| module_record(graph, id, &relative))
                        .collect(),
                }
            })
            .collect();

        Self { outputs }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

fn module_record(
    graph: &ModuleGraph,
    id: ModuleId,
    relative: &impl Fn(&Path) -> PathBuf,
) -> ModuleRecord {
    let module = graph.module(id);
    ModuleRecord {
        id,
        path: relative(&module.path),
        hash: module.content_hash.clone(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        emitter::{EmitOptions, emit},
        factoring::factor,
        reachability::compute_reachability,
    };

    #[test]
    fn test_manifest_describes_every_output() -> anyhow::Result<()> {
        let mut graph = ModuleGraph::new();
        let mut requiring_b = |path: &str| {
            graph.add_module(
                PathBuf::from(path),
                "require('./b')".to_owned(),
                vec!["./b".to_owned()],
            )
        };
        let e1 = requiring_b("/app/e1.js");
        let e2 = requiring_b("/app/e2.js");
        let b = graph.add_module(
            PathBuf::from("/app/b.js"),
            "exports.b = 1;".to_owned(),
            Vec::new(),
        );
        graph.add_dependency(e1, "./b", b);
        graph.add_dependency(e2, "./b", b);

        let entries: Vec<EntryPoint> = [("e1", e1), ("e2", e2)]
            .into_iter()
            .map(|(name, module)| EntryPoint {
                name: name.to_owned(),
                module,
                output: PathBuf::from(format!("/app/dist/{name}.js")),
            })
            .collect();
        let reach = compute_reachability(&graph, &entries);
        let partition = factor(&graph, &entries, &reach, 1);
        let layout = OutputLayout::new(&partition, &entries, Path::new("/app/dist/common.js"));
        let bundles = emit(&graph, &entries, &partition, &layout, &EmitOptions::default())?;

        let manifest =
            BuildManifest::new(&graph, &entries, &partition, &layout, &bundles, Path::new("/app"));
        assert_eq!(manifest.outputs.len(), 3);

        let common = &manifest.outputs[2];
        assert_eq!(common.file, PathBuf::from("dist/common.js"));
        assert_eq!(common.entries, vec!["e1", "e2"]);
        assert_eq!(common.modules[0].path, PathBuf::from("b.js"));
        assert_eq!(common.modules[0].hash, graph.module(b).content_hash);

        let json: serde_json::Value = serde_json::from_str(&manifest.to_json()?)?;
        assert_eq!(json["outputs"][0]["kind"], "entry");
        assert_eq!(json["outputs"][0]["index"], 0);
        assert_eq!(json["outputs"][0]["entry"], "e1");
        assert_eq!(json["outputs"][0]["loadAfter"][0], "dist/common.js");
        assert_eq!(json["outputs"][2]["kind"], "shared");
        assert!(json["outputs"][2].get("entry").is_none());
        Ok(())
    }
}
