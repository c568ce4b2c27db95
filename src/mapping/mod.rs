pub mod config;
pub mod engine;
pub mod filter;
pub mod rule;
pub mod subject;
pub mod tool;
