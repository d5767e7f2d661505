//
// reparse/mod.rs
//
// Incremental re-parsing core of the C/C++ source model
//

pub mod config;
pub mod coverage;
pub mod dependency;
pub mod error;
pub mod file_registry;
pub mod fingerprint;
pub mod inclusion_cache;
pub mod model;
pub mod parser;
pub mod scheduler;
pub mod types;
pub mod worker;



pub use config::*;
pub use coverage::*;
pub use dependency::*;
pub use error::*;
pub use file_registry::*;
pub use fingerprint::*;
pub use inclusion_cache::*;
pub use model::*;
pub use parser::*;
pub use scheduler::*;
pub use types::*;
pub use worker::*;
