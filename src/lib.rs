//! ocitables - Oracle Cloud Infrastructure resources as queryable tables
//!
//! The crate is a data-source plugin: a host query engine asks for a table
//! with some columns, quals and a limit, and the plugin lists (or gets) the
//! matching OCI resources across regions and compartments, streaming one
//! row per resource.

pub mod config;
pub mod error;
pub mod host;
pub mod oci;
pub mod plugin;
pub mod table;

/// Version injected at compile time via OCITABLES_VERSION env var (set by
/// CI/CD), or the crate version for local builds.
pub const VERSION: &str = match option_env!("OCITABLES_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
