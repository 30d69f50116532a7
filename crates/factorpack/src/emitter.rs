//! Renders buckets into executable bundles
//!
//! Every bundle starts with the same runtime prelude, which installs (once)
//! a registry on the global object. A bundle then registers its module
//! factories by id, each with a specifier -> id map, and entry bundles finish
//! by requiring their entry module.
//!
//! Registration is lazy: factories run on first `require`, and a module is
//! cached before its factory runs, so cyclic requires see partially
//! initialized exports instead of recursing. Shared bundles must be loaded
//! before any entry bundle that depends on them; otherwise the runtime throws
//! `factorpack: unregistered module id <id>` at the first cross-bundle
//! reference.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::trace;
use serde::de::IgnoredAny;

use crate::{
    errors::EmitError,
    factoring::Partition,
    layout::OutputLayout,
    module_graph::{Module, ModuleGraph, ModuleId},
    types::{Bucket, EntryPoint},
};

/// The runtime prelude shared by every bundle
pub const RUNTIME_LOADER: &str = include_str!("runtime/loader.js");

/// Global through which bundles share registered modules
pub const REGISTRY_GLOBAL: &str = "__factorpack__";

/// One rendered output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub bucket: Bucket,
    pub name: String,
    pub modules: Vec<ModuleId>,
    pub code: String,
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Prefix every module with a comment naming its origin
    pub source_maps: bool,
    /// Origin paths are shown relative to this directory when set
    pub root: Option<PathBuf>,
}

/// Render every bucket of `partition`, in partition order
pub fn emit(
    graph: &ModuleGraph,
    entries: &[EntryPoint],
    partition: &Partition,
    layout: &OutputLayout,
    options: &EmitOptions,
) -> Result<IndexMap<Bucket, Bundle>, EmitError> {
    let emitter = Emitter {
        graph,
        entries,
        partition,
        layout,
        options,
    };
    partition
        .buckets()
        .map(|(bucket, modules)| Ok((bucket, emitter.render(bucket, modules)?)))
        .collect()
}

struct Emitter<'a> {
    graph: &'a ModuleGraph,
    entries: &'a [EntryPoint],
    partition: &'a Partition,
    layout: &'a OutputLayout,
    options: &'a EmitOptions,
}

impl Emitter<'_> {
    fn render(&self, bucket: Bucket, modules: &[ModuleId]) -> Result<Bundle, EmitError> {
        trace!("Rendering {bucket} with {} modules", modules.len());

        let name = self.bundle_name(bucket);
        let mut code = self.header(bucket, &name);
        code.push_str(RUNTIME_LOADER);
        code.push_str(REGISTRY_GLOBAL);
        code.push_str(".register({\n");
        for &id in modules {
            self.render_module(self.graph.module(id), &mut code)?;
        }
        code.push_str("});\n");

        if let Some(index) = bucket.entry_index() {
            code.push_str(&format!(
                "{REGISTRY_GLOBAL}.require({});\n",
                self.entries[index].module
            ));
        }

        Ok(Bundle {
            bucket,
            name,
            modules: modules.to_vec(),
            code,
        })
    }

    fn bundle_name(&self, bucket: Bucket) -> String {
        match bucket {
            Bucket::Entry(index) => self.entries[index].name.clone(),
            Bucket::Shared(_) => {
                let file_name = self.layout.file_name(bucket);
                Path::new(&file_name)
                    .file_stem()
                    .map_or_else(|| file_name.clone(), |stem| stem.to_string_lossy().into_owned())
            }
        }
    }

    fn header(&self, bucket: Bucket, name: &str) -> String {
        match bucket {
            Bucket::Entry(index) => {
                let load_after = self
                    .partition
                    .required_shared(index)
                    .into_iter()
                    .map(|shared| self.layout.file_name(shared))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("// factorpack: entry bundle \"{name}\"\n// Load after: {load_after}\n")
            }
            Bucket::Shared(index) => {
                let load_before = self
                    .partition
                    .shared_bucket(index)
                    .map(|shared| {
                        shared
                            .loaded_by
                            .iter()
                            .map(|&entry| self.layout.file_name(Bucket::Entry(entry)))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                format!("// factorpack: shared bundle \"{name}\"\n// Load before: {load_before}\n")
            }
        }
    }

    fn render_module(&self, module: &Module, code: &mut String) -> Result<(), EmitError> {
        if self.options.source_maps {
            code.push_str(&format!("// {}\n", self.display_path(&module.path)));
        }

        code.push_str(&format!("{}: [function (require, module, exports) {{\n", module.id));
        if module.is_json() {
            serde_json::from_str::<IgnoredAny>(&module.source).map_err(|source| {
                EmitError::InvalidJson {
                    module: module.path.clone(),
                    source,
                }
            })?;
            code.push_str("module.exports = ");
            code.push_str(module.source.trim());
            code.push_str(";\n");
        } else {
            code.push_str(&module.source);
            if !module.source.ends_with('\n') {
                code.push('\n');
            }
        }

        let dependencies: IndexMap<&str, u32> = module
            .resolved
            .iter()
            .map(|(specifier, id)| (specifier.as_str(), id.as_u32()))
            .collect();
        let dependencies = serde_json::to_string(&dependencies).unwrap_or_else(|_| "{}".to_owned());
        code.push_str(&format!("}}, {dependencies}],\n"));
        Ok(())
    }

    fn display_path(&self, path: &Path) -> String {
        self.options
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{factoring::factor, reachability::compute_reachability};

    struct Build {
        graph: ModuleGraph,
        entries: Vec<EntryPoint>,
        partition: Partition,
        layout: OutputLayout,
    }

    fn build() -> Build {
        let mut graph = ModuleGraph::new();
        let main = graph.add_module(
            PathBuf::from("/app/src/main.js"),
            "var b = require('./b');\nconsole.log(b, require('./data.json'));".to_owned(),
            vec!["./b".to_owned(), "./data.json".to_owned()],
        );
        let admin = graph.add_module(
            PathBuf::from("/app/src/admin.js"),
            "require('./b');\n".to_owned(),
            vec!["./b".to_owned()],
        );
        let b = graph.add_module(
            PathBuf::from("/app/src/b.js"),
            "module.exports = 42;\n".to_owned(),
            Vec::new(),
        );
        let data = graph.add_module(
            PathBuf::from("/app/src/data.json"),
            "{\"x\": 1}\n".to_owned(),
            Vec::new(),
        );
        graph.add_dependency(main, "./b", b);
        graph.add_dependency(main, "./data.json", data);
        graph.add_dependency(admin, "./b", b);

        let entries = vec![
            EntryPoint {
                name: "main".to_owned(),
                module: main,
                output: PathBuf::from("/app/dist/main.js"),
            },
            EntryPoint {
                name: "admin".to_owned(),
                module: admin,
                output: PathBuf::from("/app/dist/admin.js"),
            },
        ];
        let reach = compute_reachability(&graph, &entries);
        let partition = factor(&graph, &entries, &reach, 1);
        let layout = OutputLayout::new(&partition, &entries, Path::new("/app/dist/common.js"));
        Build {
            graph,
            entries,
            partition,
            layout,
        }
    }

    fn emit_with(build: &Build, options: &EmitOptions) -> IndexMap<Bucket, Bundle> {
        emit(&build.graph, &build.entries, &build.partition, &build.layout, options)
            .expect("emission succeeds")
    }

    fn without_runtime(bundle: &Bundle) -> String {
        bundle.code.replacen(RUNTIME_LOADER, "", 1)
    }

    #[test]
    fn test_entry_bundle() {
        let build = build();
        let bundles = emit_with(&build, &EmitOptions::default());
        let main = &bundles[&Bucket::Entry(0)];

        assert_eq!(main.name, "main");
        insta::assert_snapshot!(without_runtime(main).trim_end(), @r#"
        // factorpack: entry bundle "main"
        // Load after: common.js
        __factorpack__.register({
        0: [function (require, module, exports) {
        var b = require('./b');
        console.log(b, require('./data.json'));
        }, {"./b":2,"./data.json":3}],
        3: [function (require, module, exports) {
        module.exports = {"x": 1};
        }, {}],
        });
        __factorpack__.require(0);
        "#);
    }

    #[test]
    fn test_shared_bundle_has_no_entry_call() {
        let build = build();
        let bundles = emit_with(&build, &EmitOptions::default());
        let common = &bundles[&Bucket::COMMON];

        assert_eq!(common.name, "common");
        assert_eq!(common.modules, vec![ModuleId::new(2)]);
        insta::assert_snapshot!(without_runtime(common).trim_end(), @r#"
        // factorpack: shared bundle "common"
        // Load before: main.js, admin.js
        __factorpack__.register({
        2: [function (require, module, exports) {
        module.exports = 42;
        }, {}],
        });
        "#);
    }

    #[test]
    fn test_runtime_loader_prelude() {
        insta::assert_snapshot!(RUNTIME_LOADER.trim_end(), @r#"
        var __factorpack__ = (function (root) {
          "use strict";
          if (root.__factorpack__) {
            return root.__factorpack__;
          }

          var definitions = Object.create(null);
          var cache = Object.create(null);

          function load(id) {
            var cached = cache[id];
            if (cached) {
              return cached.exports;
            }
            var definition = definitions[id];
            if (!definition) {
              throw new Error("factorpack: unregistered module id " + id);
            }
            var dependencies = definition[1];
            var module = { id: id, exports: {} };
            cache[id] = module;
            try {
              definition[0].call(
                module.exports,
                function require(specifier) {
                  if (!Object.prototype.hasOwnProperty.call(dependencies, specifier)) {
                    throw new Error(
                      "factorpack: cannot find module '" + specifier + "' from module " + id
                    );
                  }
                  return load(dependencies[specifier]);
                },
                module,
                module.exports
              );
            } catch (error) {
              delete cache[id];
              throw error;
            }
            return module.exports;
          }

          function register(modules) {
            for (var id in modules) {
              if (!(id in definitions)) {
                definitions[id] = modules[id];
              }
            }
          }

          root.__factorpack__ = { register: register, require: load };
          return root.__factorpack__;
        })(
          typeof globalThis !== "undefined"
            ? globalThis
            : typeof self !== "undefined"
              ? self
              : this
        );
        "#);
    }

    #[test]
    fn test_bundles_follow_partition_order() {
        let build = build();
        let bundles = emit_with(&build, &EmitOptions::default());
        let order: Vec<Bucket> = bundles.keys().copied().collect();
        assert_eq!(order, vec![Bucket::Entry(0), Bucket::Entry(1), Bucket::COMMON]);
        assert!(bundles.values().all(|b| b.code.contains(RUNTIME_LOADER)));
    }

    #[test]
    fn test_source_map_annotations() {
        let build = build();
        let options = EmitOptions {
            source_maps: true,
            root: Some(PathBuf::from("/app")),
        };
        let bundles = emit_with(&build, &options);
        let code = &bundles[&Bucket::Entry(0)].code;
        assert!(code.contains("// src/main.js\n0: [function"));
        assert!(code.contains("// src/data.json\n3: [function"));
    }

    #[test]
    fn test_invalid_json_is_an_emit_error() {
        let mut build = build();
        let mut graph = ModuleGraph::new();
        let entry = graph.add_module(
            PathBuf::from("/app/src/main.js"),
            "require('./broken.json');".to_owned(),
            vec!["./broken.json".to_owned()],
        );
        let broken = graph.add_module(
            PathBuf::from("/app/src/broken.json"),
            "{ not json".to_owned(),
            Vec::new(),
        );
        graph.add_dependency(entry, "./broken.json", broken);
        build.entries.truncate(1);
        build.entries[0].module = entry;
        let reach = compute_reachability(&graph, &build.entries);
        build.partition = factor(&graph, &build.entries, &reach, 1);
        build.layout = OutputLayout::new(
            &build.partition,
            &build.entries,
            Path::new("/app/dist/common.js"),
        );
        build.graph = graph;

        let err = emit(
            &build.graph,
            &build.entries,
            &build.partition,
            &build.layout,
            &EmitOptions::default(),
        )
        .expect_err("broken JSON should fail");
        assert!(matches!(
            err,
            EmitError::InvalidJson { ref module, .. } if module.ends_with("broken.json")
        ));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let first = emit_with(&build(), &EmitOptions::default());
        let second = emit_with(&build(), &EmitOptions::default());
        assert_eq!(first, second);
    }
}
