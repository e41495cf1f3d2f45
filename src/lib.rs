pub mod canonical;
pub mod checkpoint;
pub mod classify;
pub mod cli;
pub mod commands;
pub mod context;
pub mod depgraph;
pub mod diff;
pub mod engine;
pub mod escape;
pub mod generate;
pub mod lint;
pub mod report;
pub mod schema;
pub mod shadow;
pub mod sql;
pub mod store;
