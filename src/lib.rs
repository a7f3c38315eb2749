pub mod app;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod deletions;
pub mod dual_view;
pub mod encoding;
pub mod extend;
pub mod hunk;
pub mod language;
pub mod models;
pub mod pipeline;
pub mod position;
pub mod sources;
pub mod tokens;

#[cfg(test)]
pub mod test_utils;
