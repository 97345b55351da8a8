//! Session cache
//!
//! Everything looked up once per connection and shared by all tables:
//! regional clients, subscribed regions, the compartment tree,
//! availability domains per region and the object storage namespace.

use super::client::OciClient;
use super::http::add_query_params;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{OnceCell, RwLock};

/// A region the tenancy is subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSubscription {
    pub region_name: String,
    pub region_key: String,
    pub is_home_region: bool,
    pub status: String,
}

impl From<&Value> for RegionSubscription {
    fn from(value: &Value) -> Self {
        let text = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        Self {
            region_name: text("regionName"),
            region_key: text("regionKey"),
            is_home_region: value
                .get("isHomeRegion")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            status: text("status"),
        }
    }
}

/// Compartment information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compartment {
    pub id: String,
    pub name: String,
    pub lifecycle_state: String,
}

impl Compartment {
    /// Compartment from a list item; items without an `id` are skipped
    pub fn parse(value: &Value) -> Option<Self> {
        let id = value.get("id").and_then(|v| v.as_str())?;
        Some(Self {
            id: id.to_string(),
            name: value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            lifecycle_state: value
                .get("lifecycleState")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
        })
    }
}

/// Whether a region pattern uses glob syntax
pub fn is_pattern(region: &str) -> bool {
    region.contains(['*', '?', '['])
}

/// Filter `available` regions by configured patterns, keeping the order of
/// `available`. Invalid patterns match nothing.
pub fn match_regions(patterns: &[String], available: &[String]) -> Vec<String> {
    let compiled: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();
    available
        .iter()
        .filter(|region| compiled.iter().any(|p| p.matches(region)))
        .cloned()
        .collect()
}

/// Per-connection cache shared by every table
pub struct Session {
    base: OciClient,
    pub tenancy_ocid: String,
    region_patterns: Vec<String>,
    clients: RwLock<HashMap<String, OciClient>>,
    subscriptions: OnceCell<Vec<RegionSubscription>>,
    compartments: OnceCell<Vec<Compartment>>,
    availability_domains: RwLock<HashMap<String, Vec<String>>>,
    namespace: OnceCell<String>,
}

impl Session {
    /// `base` is bound to the default region (profile, env or first
    /// configured region)
    pub fn new(base: OciClient, tenancy_ocid: &str, region_patterns: Vec<String>) -> Self {
        Self {
            base,
            tenancy_ocid: tenancy_ocid.to_string(),
            region_patterns,
            clients: RwLock::new(HashMap::new()),
            subscriptions: OnceCell::new(),
            compartments: OnceCell::new(),
            availability_domains: RwLock::new(HashMap::new()),
            namespace: OnceCell::new(),
        }
    }

    pub fn default_region(&self) -> &str {
        &self.base.region
    }

    /// Client for `region`, cached by region
    pub async fn client(&self, region: &str) -> OciClient {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(region) {
                return client.clone();
            }
        }

        let mut clients = self.clients.write().await;
        clients
            .entry(region.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating client for region {}", region);
                self.base.for_region(region)
            })
            .clone()
    }

    /// Regions the tenancy is subscribed to
    pub async fn subscriptions(&self) -> Result<&[RegionSubscription]> {
        let subs = self
            .subscriptions
            .get_or_try_init(|| async {
                let url = self.base.url(
                    "identity",
                    &format!("/20160918/tenancies/{}/regionSubscriptions", self.tenancy_ocid),
                )?;
                let body = self
                    .base
                    .get(&url)
                    .await
                    .context("Failed to list region subscriptions")?;
                let subs: Vec<RegionSubscription> = body
                    .as_array()
                    .map(|arr| arr.iter().map(RegionSubscription::from).collect())
                    .unwrap_or_default();
                tracing::info!("Tenancy is subscribed to {} regions", subs.len());
                Ok::<_, anyhow::Error>(subs)
            })
            .await?;
        Ok(subs.as_slice())
    }

    /// Home region, falling back to the default region when subscriptions
    /// cannot be read
    pub async fn home_region(&self) -> String {
        match self.subscriptions().await {
            Ok(subs) => subs
                .iter()
                .find(|s| s.is_home_region)
                .map(|s| s.region_name.clone())
                .unwrap_or_else(|| self.default_region().to_string()),
            Err(e) => {
                tracing::warn!("Failed to determine home region: {:#}", e);
                self.default_region().to_string()
            },
        }
    }

    /// Regions a query fans out to
    pub async fn query_regions(&self) -> Vec<String> {
        if self.region_patterns.is_empty() {
            return vec![self.default_region().to_string()];
        }

        match self.subscriptions().await {
            Ok(subs) => {
                let ready: Vec<String> = subs
                    .iter()
                    .filter(|s| s.status.is_empty() || s.status == "READY")
                    .map(|s| s.region_name.clone())
                    .collect();
                let regions = match_regions(&self.region_patterns, &ready);
                if regions.is_empty() {
                    tracing::warn!(
                        "No subscribed region matches {:?}",
                        self.region_patterns
                    );
                }
                regions
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to list region subscriptions, using literal regions only: {:#}",
                    e
                );
                self.region_patterns
                    .iter()
                    .filter(|r| !is_pattern(r))
                    .cloned()
                    .collect()
            },
        }
    }

    /// The tenancy root plus every active compartment in its subtree
    pub async fn compartments(&self) -> Result<&[Compartment]> {
        let compartments = self
            .compartments
            .get_or_try_init(|| async {
                let client = self.client(&self.home_region().await).await;
                let url = add_query_params(
                    &client.url("identity", "/20160918/compartments")?,
                    &[
                        ("compartmentId".to_string(), self.tenancy_ocid.clone()),
                        ("compartmentIdInSubtree".to_string(), "true".to_string()),
                        ("accessLevel".to_string(), "ANY".to_string()),
                        ("lifecycleState".to_string(), "ACTIVE".to_string()),
                    ],
                );
                let items = client
                    .list_all(&url, "")
                    .await
                    .context("Failed to list compartments")?;

                let mut compartments = vec![Compartment {
                    id: self.tenancy_ocid.clone(),
                    name: "root".to_string(),
                    lifecycle_state: "ACTIVE".to_string(),
                }];
                compartments.extend(
                    items
                        .iter()
                        .filter_map(Compartment::parse)
                        .filter(|c| c.lifecycle_state == "ACTIVE"),
                );
                tracing::info!("Loaded {} compartments", compartments.len());
                Ok::<_, anyhow::Error>(compartments)
            })
            .await?;
        Ok(compartments.as_slice())
    }

    /// Availability domain names in `region`
    pub async fn availability_domains(&self, region: &str) -> Result<Vec<String>> {
        {
            let cache = self.availability_domains.read().await;
            if let Some(ads) = cache.get(region) {
                return Ok(ads.clone());
            }
        }

        let client = self.client(region).await;
        let url = add_query_params(
            &client.url("identity", "/20160918/availabilityDomains")?,
            &[("compartmentId".to_string(), self.tenancy_ocid.clone())],
        );
        let body = client
            .get(&url)
            .await
            .with_context(|| format!("Failed to list availability domains in {}", region))?;
        let ads: Vec<String> = body
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|ad| ad.get("name").and_then(|v| v.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let mut cache = self.availability_domains.write().await;
        cache.insert(region.to_string(), ads.clone());
        Ok(ads)
    }

    /// Object storage namespace of the tenancy
    pub async fn namespace(&self) -> Result<&str> {
        let namespace = self
            .namespace
            .get_or_try_init(|| async {
                let client = self.client(&self.home_region().await).await;
                let body = client
                    .get(&client.url("objectstorage", "/n/")?)
                    .await
                    .context("Failed to get object storage namespace")?;
                body.as_str()
                    .map(|s| s.to_string())
                    .context("Object storage namespace response is not a string")
            })
            .await?;
        Ok(namespace.as_str())
    }

    /// Fill session placeholders (`{tenancy}`, `{namespace}`) in a path
    pub async fn resolve_path(&self, path: &str) -> Result<String> {
        let mut resolved = path.replace("{tenancy}", &self.tenancy_ocid);
        if resolved.contains("{namespace}") {
            resolved = resolved.replace("{namespace}", self.namespace().await?);
        }
        Ok(resolved)
    }
}
