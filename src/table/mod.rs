//! Table abstraction layer
//!
//! Tables are data-driven. Their definitions are loaded from JSON files at
//! compile time, so a new table is usually a new JSON entry rather than
//! new code.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and validates table definitions from embedded JSON
//! - [`column`] - Column types, transforms and tag merging
//! - [`matrix`] - Expands a table's scope into region/compartment/zone items
//! - [`fetcher`] - List, get and hydrate calls with pagination
//!
//! # Table Definitions
//!
//! Tables are defined in JSON files under `src/resources/`:
//! - `identity.json` - Tenancy, users, groups, policies, compartments
//! - `core.json` - Instances, images, volumes and backups
//! - `network.json` - VCNs, subnets, gateways, load balancers
//! - `database.json` - Autonomous databases, DB systems, MySQL, NoSQL
//! - `storage.json` - Buckets and file storage
//! - `security.json` - Vaults, secrets, certificates, Cloud Guard
//! - `services.json` - Everything else (events, functions, OKE, ...)
//!
//! # Example
//!
//! ```ignore
//! use ocitables::table::{get_table, fetcher::{list_table, FetchOptions}};
//!
//! async fn list_instances(session: &Session, ctx: &QueryContext, rows: &RowStream) -> anyhow::Result<()> {
//!     let table = get_table("oci_core_instance").unwrap();
//!     list_table(table, session, &FetchOptions::default(), ctx, rows).await
//! }
//! ```

pub mod column;
pub mod fetcher;
pub mod matrix;
pub mod registry;

pub use registry::{get_registry, get_table, table_names, Scope, TableDef};
