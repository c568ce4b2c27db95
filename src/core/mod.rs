pub mod error;
pub mod graph;
pub mod model;
pub mod output;
pub mod state;
pub mod types;
