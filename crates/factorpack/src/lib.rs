pub mod cli;
pub mod config;
pub mod emitter;
pub mod errors;
pub mod extraction;
pub mod factoring;
pub mod graph_builder;
pub mod layout;
pub mod manifest;
pub mod module_graph;
pub mod orchestrator;
pub mod reachability;
pub mod resolver;
pub mod types;
