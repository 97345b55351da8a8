//! Matrix items
//!
//! A table's list call is repeated for every combination of region,
//! compartment and availability domain its scope calls for.

use super::registry::{Scope, TableDef};
use crate::error::has_error_code;
use crate::host::QueryContext;
use crate::oci::session::Session;
use anyhow::Result;
use std::collections::HashMap;

/// One scope a list call runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixItem {
    pub region: String,
    pub compartment_id: Option<String>,
    /// Availability domain
    pub zone: Option<String>,
}

impl MatrixItem {
    pub fn new(region: &str, compartment_id: Option<&str>, zone: Option<&str>) -> Self {
        Self {
            region: region.to_string(),
            compartment_id: compartment_id.map(|c| c.to_string()),
            zone: zone.map(|z| z.to_string()),
        }
    }
}

/// Inputs gathered from the session
#[derive(Debug, Clone, Default)]
pub struct MatrixInputs {
    pub tenancy_ocid: String,
    pub home_region: String,
    pub regions: Vec<String>,
    pub compartments: Vec<String>,
    /// Availability domains per region
    pub zones: HashMap<String, Vec<String>>,
}

/// Expand a scope into matrix items, narrowed by `=` quals on `region`
/// and `compartment_id`
pub fn expand_matrix(scope: Scope, inputs: &MatrixInputs, ctx: &QueryContext) -> Vec<MatrixItem> {
    let region_qual = ctx.equals_qual_str("region");
    let compartment_qual = ctx.equals_qual_str("compartment_id");

    let regions: Vec<&String> = match scope {
        Scope::Tenancy | Scope::HomeCompartment => vec![&inputs.home_region],
        Scope::Region | Scope::Compartment | Scope::Zone => inputs.regions.iter().collect(),
    }
    .into_iter()
    .filter(|r| region_qual.as_ref().map(|q| q == *r).unwrap_or(true))
    .collect();

    let tenancy = vec![inputs.tenancy_ocid.clone()];
    let compartments: Vec<&String> = match scope {
        Scope::Tenancy | Scope::Region => tenancy.iter().collect(),
        Scope::HomeCompartment | Scope::Compartment | Scope::Zone => inputs
            .compartments
            .iter()
            .filter(|c| compartment_qual.as_ref().map(|q| q == *c).unwrap_or(true))
            .collect(),
    };

    let mut items = Vec::new();
    for region in &regions {
        for compartment in &compartments {
            if scope == Scope::Zone {
                for zone in inputs.zones.get(*region).into_iter().flatten() {
                    items.push(MatrixItem::new(region, Some(compartment.as_str()), Some(zone.as_str())));
                }
            } else {
                items.push(MatrixItem::new(region, Some(compartment.as_str()), None));
            }
        }
    }
    items
}

/// Build the matrix for a query, loading regions, compartments and
/// availability domains from the session as the scope requires. A region
/// whose availability domains fail with one of `ignore_error_codes` is
/// left out.
pub async fn build_matrix(
    table: &TableDef,
    session: &Session,
    ctx: &QueryContext,
    ignore_error_codes: &[String],
) -> Result<Vec<MatrixItem>> {
    let mut inputs = MatrixInputs {
        tenancy_ocid: session.tenancy_ocid.clone(),
        home_region: session.home_region().await,
        ..Default::default()
    };

    if matches!(table.scope, Scope::Region | Scope::Compartment | Scope::Zone) {
        inputs.regions = session.query_regions().await;
    }
    if matches!(table.scope, Scope::HomeCompartment | Scope::Compartment | Scope::Zone) {
        inputs.compartments = session
            .compartments()
            .await?
            .iter()
            .map(|c| c.id.clone())
            .collect();
    }
    if table.scope == Scope::Zone {
        let region_qual = ctx.equals_qual_str("region");
        for region in &inputs.regions {
            if region_qual.as_ref().map(|q| q != region).unwrap_or(false) {
                continue;
            }
            match session.availability_domains(region).await {
                Ok(ads) => {
                    inputs.zones.insert(region.clone(), ads);
                },
                Err(e) if has_error_code(&e, ignore_error_codes) => {
                    tracing::warn!("{}: skipping {}: {:#}", table.name, region, e);
                },
                Err(e) => return Err(e),
            }
        }
    }

    let items = expand_matrix(table.scope, &inputs, ctx);
    tracing::debug!("{}: {} matrix items", table.name, items.len());
    Ok(items)
}
