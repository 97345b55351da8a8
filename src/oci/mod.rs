//! OCI API interaction module
//!
//! This module provides the core functionality for interacting with Oracle
//! Cloud Infrastructure APIs: request signing, the HTTP client, retry
//! policy, regions and the per-connection session cache.
//!
//! # Module Structure
//!
//! - [`auth`] - Credential resolution and OCI HTTP request signing
//! - [`client`] - Regional client and service endpoint builders
//! - [`http`] - Signed HTTP calls with pagination headers
//! - [`regions`] - Region identifiers and OCID helpers
//! - [`retry`] - Exponential backoff for throttling and server errors
//! - [`session`] - Clients, regions and compartments cached per connection
//!
//! # Example
//!
//! ```ignore
//! use ocitables::oci::client::OciClient;
//!
//! async fn example(client: &OciClient) -> anyhow::Result<()> {
//!     let url = client.url("core", "/20160918/instances?compartmentId=ocid1.tenancy.oc1..aaaa")?;
//!     let instances = client.list_all(&url, "").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod regions;
pub mod retry;
pub mod session;
