//! Report rendering for the `predict` command.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, Report};
