//! Plugin entry point
//!
//! One [`Plugin`] per connection. It owns the session cache and answers the
//! host's schema and query calls.

use crate::config::ConnectionConfig;
use crate::host::{QueryContext, Row, RowStream};
use crate::oci::auth::{Credentials, RequestSigner};
use crate::oci::client::OciClient;
use crate::oci::http::OciHttpClient;
use crate::oci::session::{is_pattern, Session};
use crate::table::column::ColumnType;
use crate::table::fetcher::{get_item, list_table, FetchOptions};
use crate::table::registry::{get_table, table_names, TableDef};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Column as reported to the host
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub description: String,
}

pub struct Plugin {
    session: Session,
    options: FetchOptions,
}

impl Plugin {
    /// Resolve credentials and build the session for a connection
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let credentials = Credentials::resolve(&config)?;
        tracing::debug!("Resolved credentials: {:?}", credentials);
        let signer = credentials.signer()?;
        Self::with_signer(
            config,
            &credentials.tenancy_ocid,
            credentials.region.as_deref(),
            signer,
        )
    }

    /// Build the plugin around an existing signer. The default region is
    /// `region`, else the first non-pattern configured region.
    pub fn with_signer(
        config: ConnectionConfig,
        tenancy_ocid: &str,
        region: Option<&str>,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self> {
        let default_region = region
            .map(|r| r.to_string())
            .or_else(|| config.regions.iter().find(|r| !is_pattern(r)).cloned())
            .context("No region configured. Set OCI_REGION, a profile region or a literal entry in regions")?;

        let http = OciHttpClient::new(config.retry_policy())?;
        let client = OciClient::new(http, signer, &default_region, config.endpoint_override.clone());
        tracing::info!(
            "Connection ready: default region {}, regions {:?}",
            default_region,
            config.regions
        );

        Ok(Self {
            session: Session::new(client, tenancy_ocid, config.regions.clone()),
            options: FetchOptions {
                ignore_error_codes: config.ignore_error_codes.clone(),
                concurrency: config.effective_concurrency(),
            },
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        table_names()
    }

    /// Columns of a table
    pub fn schema(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        let table = lookup(table)?;
        Ok(table
            .columns
            .iter()
            .map(|c| ColumnSchema {
                name: c.name.clone(),
                column_type: c.column_type,
                description: c.description.clone(),
            })
            .collect())
    }

    /// Run a query, sending rows to `tx`. Returns the number of rows sent.
    pub async fn execute(&self, table: &str, ctx: &QueryContext, tx: mpsc::Sender<Row>) -> Result<u64> {
        let table = lookup(table)?;
        let rows = RowStream::new(tx, ctx.limit);

        if let Some(get) = &table.get {
            if let Some(id) = ctx.equals_qual_str(&get.key_column) {
                tracing::debug!("{}: get {}", table.name, id);
                get_item(table, &self.session, ctx, &id, &rows).await?;
                return Ok(rows.streamed());
            }
        }

        check_required(table, ctx)?;
        tracing::debug!("{}: list with {} quals", table.name, ctx.quals.len());
        list_table(table, &self.session, &self.options, ctx, &rows).await?;

        let streamed = rows.streamed();
        tracing::info!("{}: {} rows", table.name, streamed);
        Ok(streamed)
    }
}

fn lookup(name: &str) -> Result<&'static TableDef> {
    get_table(name).with_context(|| format!("Unknown table: {}", name))
}

/// Tables such as API keys need an `=` qual on some column
fn check_required(table: &TableDef, ctx: &QueryContext) -> Result<()> {
    for key in table.key_columns.iter().filter(|k| k.required) {
        if ctx.equals_qual(&key.column).is_none() {
            bail!("{} requires an '=' qual on {}", table.name, key.column);
        }
    }
    Ok(())
}
