#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod beta;
pub mod catalog;
pub mod config;
pub mod cpg_index;
pub mod engine;
pub mod manifest;
pub mod pipeline;
pub mod sampling;
pub mod tracker;
pub mod types;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod shared {
    pub use super::shared_files as files;
}

#[path = "../analysis/mod.rs"]
pub mod analysis;
