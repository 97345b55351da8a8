//! OCI Client
//!
//! Regional client combining request signing and the HTTP layer, with
//! endpoint builders for every service the tables use.

use super::auth::RequestSigner;
use super::http::{add_query_params, OciHttpClient, Page};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;

/// Query parameter carrying the pagination token
pub const PAGE_PARAM: &str = "page";

/// Service key -> host template (`{region}` is substituted)
const SERVICE_HOSTS: &[(&str, &str)] = &[
    ("identity", "identity.{region}.oci.oraclecloud.com"),
    ("core", "iaas.{region}.oraclecloud.com"),
    ("loadbalancer", "iaas.{region}.oraclecloud.com"),
    ("database", "database.{region}.oraclecloud.com"),
    ("mysql", "mysql.{region}.ocp.oraclecloud.com"),
    ("nosql", "nosql.{region}.oci.oraclecloud.com"),
    ("objectstorage", "objectstorage.{region}.oraclecloud.com"),
    ("filestorage", "filestorage.{region}.oraclecloud.com"),
    ("kms", "kms.{region}.oraclecloud.com"),
    ("vaults", "vaults.{region}.oci.oraclecloud.com"),
    ("certificates", "certificatesmanagement.{region}.oci.oraclecloud.com"),
    ("cloudguard", "cloudguard-cp-api.{region}.oci.oraclecloud.com"),
    ("ons", "notification.{region}.oraclecloud.com"),
    ("events", "events.{region}.oraclecloud.com"),
    ("monitoring", "telemetry.{region}.oraclecloud.com"),
    ("logging", "logging.{region}.oci.oraclecloud.com"),
    ("functions", "functions.{region}.oraclecloud.com"),
    ("containerengine", "containerengine.{region}.oraclecloud.com"),
    ("artifacts", "artifacts.{region}.oci.oraclecloud.com"),
    ("networkloadbalancer", "network-load-balancer-api.{region}.oci.oraclecloud.com"),
    ("dns", "dns.{region}.oci.oraclecloud.com"),
    ("streaming", "streaming.{region}.oci.oraclecloud.com"),
    ("apigateway", "apigateway.{region}.oci.oraclecloud.com"),
    ("autoscaling", "autoscaling.{region}.oci.oraclecloud.com"),
    ("resourcemanager", "resourcemanager.{region}.oraclecloud.com"),
];

/// Whether `service` has a known endpoint
pub fn is_known_service(service: &str) -> bool {
    SERVICE_HOSTS.iter().any(|(key, _)| *key == service)
}

/// Main OCI client, bound to one region
#[derive(Clone)]
pub struct OciClient {
    pub http: OciHttpClient,
    signer: Arc<dyn RequestSigner>,
    pub region: String,
    endpoint_override: Option<String>,
}

impl OciClient {
    pub fn new(
        http: OciHttpClient,
        signer: Arc<dyn RequestSigner>,
        region: &str,
        endpoint_override: Option<String>,
    ) -> Self {
        Self {
            http,
            signer,
            region: region.to_string(),
            endpoint_override: endpoint_override.map(|e| e.trim_end_matches('/').to_string()),
        }
    }

    /// Same credentials and transport, another region
    pub fn for_region(&self, region: &str) -> Self {
        Self {
            region: region.to_string(),
            ..self.clone()
        }
    }

    /// Base URL of a service in this client's region
    pub fn endpoint(&self, service: &str) -> Result<String> {
        if let Some(base) = &self.endpoint_override {
            return Ok(base.clone());
        }
        let (_, template) = SERVICE_HOSTS
            .iter()
            .find(|(key, _)| *key == service)
            .with_context(|| format!("Unknown service: {}", service))?;
        Ok(format!("https://{}", template.replace("{region}", &self.region)))
    }

    /// Full URL for `path` on `service`
    pub fn url(&self, service: &str, path: &str) -> Result<String> {
        Ok(format!("{}{}", self.endpoint(service)?, path))
    }

    /// Fetch one page
    pub async fn get_page(&self, url: &str) -> Result<Page> {
        self.http.get(url, self.signer.as_ref()).await
    }

    /// GET and return the body
    pub async fn get(&self, url: &str) -> Result<Value> {
        Ok(self.get_page(url).await?.body)
    }

    /// Fetch every page of a list call and collect the items
    pub async fn list_all(&self, url: &str, response_path: &str) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_url = match &page_token {
                Some(token) => add_query_params(url, &[(PAGE_PARAM.to_string(), token.clone())]),
                None => url.to_string(),
            };
            let page = self.get_page(&page_url).await?;
            all_items.extend(items_at(&page.body, response_path));

            if page.next_page.is_none() {
                break;
            }
            page_token = page.next_page;
        }

        Ok(all_items)
    }
}

/// Items of a list response. An empty `response_path` means the body is the
/// array itself (most OCI list calls); otherwise a dot path such as `items`.
pub fn items_at(body: &Value, response_path: &str) -> Vec<Value> {
    let mut current = body;
    if !response_path.is_empty() {
        for part in response_path.split('.') {
            current = match current.get(part) {
                Some(v) => v,
                None => return vec![],
            };
        }
    }
    current.as_array().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_at() {
        let body = json!([{"id": "a"}, {"id": "b"}]);
        assert_eq!(items_at(&body, "").len(), 2);

        let body = json!({"items": [{"id": "a"}]});
        assert_eq!(items_at(&body, "items").len(), 1);
        assert!(items_at(&body, "missing").is_empty());
        assert!(items_at(&json!({"items": {}}), "items").is_empty());
    }

    #[test]
    fn test_known_services() {
        assert!(is_known_service("core"));
        assert!(is_known_service("identity"));
        assert!(!is_known_service("compute"));
    }
}
