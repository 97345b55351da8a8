//! Table Fetcher
//!
//! Runs a table's list or get call across its matrix, pages through the
//! results, hydrates rows that need it and streams them to the host.

use super::column::{lookup_path, to_camel_case, RowSource};
use super::matrix::{build_matrix, MatrixItem};
use super::registry::{get_table, ListDef, TableDef};
use crate::error::{has_error_code, is_not_found};
use crate::host::{value_to_param, QueryContext, Row, RowStream};
use crate::oci::client::{items_at, OciClient};
use crate::oci::http::add_query_params;
use crate::oci::regions::region_from_ocid;
use crate::oci::session::Session;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Options shared by every fetch on a connection
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Error codes that skip a matrix item instead of failing the query
    pub ignore_error_codes: Vec<String>,
    /// Matrix items fetched at once
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ignore_error_codes: Vec::new(),
            concurrency: crate::config::DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// `limit` for the next page: the table's page size, shrunk to the rows
/// the host still wants. Small remainders are sent even without a page
/// size since every OCI list call accepts at least 100.
pub fn page_limit(page_size: Option<u64>, remaining: Option<u64>) -> Option<u64> {
    match (page_size, remaining) {
        (Some(size), Some(rows)) => Some(size.min(rows).max(1)),
        (Some(size), None) => Some(size),
        (None, Some(rows)) if rows < 100 => Some(rows.max(1)),
        _ => None,
    }
}

/// Replace `{path}` placeholders with URL-encoded values from `item`.
/// Placeholders with no matching scalar are left in place.
pub fn fill_template(template: &str, item: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let key = &rest[start + 1..start + len];
        out.push_str(&rest[..start]);
        let value = lookup_path(item, key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        match value {
            Some(v) => out.push_str(&urlencoding::encode(&v)),
            None => out.push_str(&rest[start..=start + len]),
        }
        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);
    out
}

/// Query params of a list call for one matrix item. Key column quals are
/// only applied when `ctx` is given (not for parent listings).
pub fn list_params(
    table: &TableDef,
    list: &ListDef,
    item: &MatrixItem,
    ctx: Option<&QueryContext>,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();

    if let (Some(param), Some(compartment)) = (&list.compartment_param, &item.compartment_id) {
        params.push((param.clone(), compartment.clone()));
    }
    if let Some(zone) = item.zone.as_ref().filter(|_| !list.zone_param.is_empty()) {
        params.push((list.zone_param.clone(), zone.clone()));
    }
    for (key, value) in &list.static_params {
        params.push((key.clone(), value.clone()));
    }

    if let Some(ctx) = ctx {
        for key in &table.key_columns {
            let Some(param) = &key.param else {
                continue;
            };
            if let Some(value) = ctx.equals_qual(&key.column) {
                let value = value_to_param(value);
                let value = if key.uppercase { value.to_uppercase() } else { value };
                params.push((param.clone(), value));
            }
        }
    }

    params
}

/// Matrix for a child list whose parent is pinned by an `=` qual. The
/// child request only varies by the params the list actually sends, so
/// items that would repeat a request are dropped, as are items outside
/// the region the parent OCID names.
pub fn pinned_parent_matrix(list: &ListDef, parent_id: &str, matrix: Vec<MatrixItem>) -> Vec<MatrixItem> {
    let parent_region = region_from_ocid(parent_id);
    let mut seen = HashSet::new();

    matrix
        .into_iter()
        .filter(|item| parent_region.as_ref().map(|r| *r == item.region).unwrap_or(true))
        .filter(|item| {
            let compartment = list.compartment_param.as_ref().and(item.compartment_id.clone());
            let zone = item.zone.clone().filter(|_| !list.zone_param.is_empty());
            seen.insert((item.region.clone(), compartment, zone))
        })
        .collect()
}

/// Fetch every raw item of a list call, ignoring quals and limits
async fn list_raw(table: &TableDef, session: &Session, item: &MatrixItem) -> Result<Vec<Value>> {
    let client = session.client(&item.region).await;
    let path = session.resolve_path(&table.list.path).await?;
    let url = add_query_params(
        &client.url(&table.service, &path)?,
        &list_params(table, &table.list, item, None),
    );
    client.list_all(&url, &table.list.response_path).await
}

/// List a table across its matrix and stream the rows
pub async fn list_table(
    table: &TableDef,
    session: &Session,
    options: &FetchOptions,
    ctx: &QueryContext,
    rows: &RowStream,
) -> Result<()> {
    let mut matrix = build_matrix(table, session, ctx, &options.ignore_error_codes).await?;
    if let Some(parent) = &table.list.parent {
        if let Some(parent_id) = ctx.equals_qual_str(&parent.key_column) {
            matrix = pinned_parent_matrix(&table.list, &parent_id, matrix);
            tracing::debug!("{}: {} matrix items for parent {}", table.name, matrix.len(), parent_id);
        }
    }

    let mut results = stream::iter(
        matrix
            .into_iter()
            .map(|item| async move { (list_matrix_item(table, session, ctx, rows, &item).await, item) }),
    )
    .buffer_unordered(options.concurrency.max(1));

    while let Some((result, item)) = results.next().await {
        if let Err(e) = result {
            if has_error_code(&e, &options.ignore_error_codes) {
                tracing::warn!(
                    "{}: skipping {} / {:?}: {:#}",
                    table.name,
                    item.region,
                    item.compartment_id,
                    e
                );
                continue;
            }
            return Err(e);
        }
    }

    Ok(())
}

/// Run the list call of one matrix item, following parents when the
/// table is a child resource
async fn list_matrix_item(
    table: &TableDef,
    session: &Session,
    ctx: &QueryContext,
    rows: &RowStream,
    item: &MatrixItem,
) -> Result<()> {
    let Some(parent) = &table.list.parent else {
        return list_pages(table, session, ctx, rows, item, &table.list.path, None).await;
    };

    let parent_ids: Vec<String> = match ctx.equals_qual_str(&parent.key_column) {
        Some(id) => vec![id],
        None => {
            let parent_table = get_table(&parent.table)
                .with_context(|| format!("{}: unknown parent table {}", table.name, parent.table))?;
            list_raw(parent_table, session, item)
                .await
                .with_context(|| format!("{}: failed to list {}", table.name, parent.table))?
                .iter()
                .filter_map(|p| lookup_path(p, &parent.field).and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        },
    };

    for parent_id in parent_ids {
        if rows.is_done() {
            break;
        }
        let path = table.list.path.replace("{parent}", &urlencoding::encode(&parent_id));
        match list_pages(table, session, ctx, rows, item, &path, Some(&parent_id)).await {
            Ok(()) => {},
            // The parent may be gone by the time its children are listed
            Err(e) if is_not_found(&e) => {
                tracing::debug!("{}: parent {} not found", table.name, parent_id);
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Page through one list call. Child items get the parent id under the
/// parent key column when the API leaves it out.
async fn list_pages(
    table: &TableDef,
    session: &Session,
    ctx: &QueryContext,
    rows: &RowStream,
    item: &MatrixItem,
    path: &str,
    parent_id: Option<&str>,
) -> Result<()> {
    let client = session.client(&item.region).await;
    let path = session.resolve_path(path).await?;
    let url = client.url(&table.service, &path)?;
    let base_params = list_params(table, &table.list, item, Some(ctx));

    let mut page_token: Option<String> = None;
    let mut pages = 0;

    loop {
        if rows.is_done() {
            break;
        }

        let mut params = base_params.clone();
        if let Some(limit) = page_limit(table.list.page_size, rows.rows_remaining()) {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(token) = &page_token {
            params.push((table.list.page_param.clone(), token.clone()));
        }

        let page = client
            .get_page(&add_query_params(&url, &params))
            .await
            .with_context(|| format!("{}: list failed in {}", table.name, item.region))?;
        pages += 1;

        let body_token = table
            .list
            .page_token_field
            .as_deref()
            .and_then(|field| lookup_path(&page.body, field))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let next_page = page.next_page.clone().or(body_token);

        let items = if table.list.single {
            match page.body {
                Value::Null => vec![],
                body => vec![body],
            }
        } else {
            items_at(&page.body, &table.list.response_path)
        };

        for mut raw in items {
            if let (Some(parent), Some(id), Value::Object(fields)) = (&table.list.parent, parent_id, &mut raw) {
                fields
                    .entry(to_camel_case(&parent.key_column))
                    .or_insert_with(|| Value::String(id.to_string()));
            }
            if rows.is_done() {
                return Ok(());
            }
            let row = build_row(table, session, &client, ctx, &raw, item).await?;
            if !rows.stream(row).await {
                tracing::debug!("{}: stopping after {} pages", table.name, pages);
                return Ok(());
            }
        }

        match next_page {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(())
}

/// Fetch a single resource by its key and stream it. A 404 (or a region
/// qual that excludes the resource's region) streams nothing.
pub async fn get_item(table: &TableDef, session: &Session, ctx: &QueryContext, id: &str, rows: &RowStream) -> Result<()> {
    let Some(get) = &table.get else {
        anyhow::bail!("{} has no get call", table.name);
    };

    let region = match region_from_ocid(id) {
        Some(region) => region,
        None => session.home_region().await,
    };
    if let Some(wanted) = ctx.equals_qual_str("region") {
        if wanted != region {
            tracing::debug!("{}: {} is not in {}", table.name, id, wanted);
            return Ok(());
        }
    }

    let client = session.client(&region).await;
    let path = session
        .resolve_path(&fill_template(&get.path, &json!({ "id": id })))
        .await?;
    let url = client.url(&table.service, &path)?;

    let body = match client.get(&url).await {
        Ok(body) => body,
        Err(e) if is_not_found(&e) => {
            tracing::debug!("{}: {} not found", table.name, id);
            return Ok(());
        },
        Err(e) => return Err(e.context(format!("{}: get {} failed", table.name, id))),
    };

    let raw = if get.response_path.is_empty() {
        body
    } else {
        lookup_path(&body, &get.response_path)
            .cloned()
            .unwrap_or(Value::Null)
    };
    if raw.is_null() {
        return Ok(());
    }

    let item = MatrixItem::new(&region, None, None);
    let row = build_row(table, session, &client, ctx, &raw, &item).await?;
    rows.stream(row).await;
    Ok(())
}

/// Run the hydrates whose columns the query needs
async fn hydrate(
    table: &TableDef,
    session: &Session,
    client: &OciClient,
    ctx: &QueryContext,
    raw: &Value,
) -> Result<HashMap<String, Value>> {
    let mut hydrated = HashMap::new();

    for def in &table.hydrate {
        let needed = table
            .columns
            .iter()
            .any(|c| c.hydrate.as_deref() == Some(def.name.as_str()) && ctx.needs_column(&c.name));
        if !needed {
            continue;
        }

        let path = session.resolve_path(&fill_template(&def.path, raw)).await?;
        if path.contains('{') {
            tracing::debug!("{}: hydrate {} has unresolved fields in {}", table.name, def.name, path);
            continue;
        }
        let url = client.url(&table.service, &path)?;
        match client.get(&url).await {
            Ok(body) => {
                let value = if def.response_path.is_empty() {
                    body
                } else {
                    lookup_path(&body, &def.response_path)
                        .cloned()
                        .unwrap_or(Value::Null)
                };
                hydrated.insert(def.name.clone(), value);
            },
            Err(e) if is_not_found(&e) => {
                tracing::debug!("{}: hydrate {} found nothing", table.name, def.name);
            },
            Err(e) => {
                return Err(e.context(format!("{}: hydrate {} failed", table.name, def.name)));
            },
        }
    }

    Ok(hydrated)
}

/// Hydrate a raw item and apply every column transform
async fn build_row(
    table: &TableDef,
    session: &Session,
    client: &OciClient,
    ctx: &QueryContext,
    raw: &Value,
    item: &MatrixItem,
) -> Result<Row> {
    let hydrated = hydrate(table, session, client, ctx, raw).await?;
    Ok(transform_row(table, raw, &hydrated, item, &session.tenancy_ocid))
}

/// Apply every column transform to a raw item
pub fn transform_row(
    table: &TableDef,
    raw: &Value,
    hydrated: &HashMap<String, Value>,
    item: &MatrixItem,
    tenant_id: &str,
) -> Row {
    let source = RowSource {
        item: raw,
        hydrated,
        region: &item.region,
        compartment_id: item.compartment_id.as_deref(),
        tenant_id,
        tags: table.tags.as_ref(),
        title_field: &table.title_field,
    };

    table
        .columns
        .iter()
        .map(|column| (column.name.clone(), column.value(&source)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Qual;
    use crate::table::registry::get_table;

    #[test]
    fn test_page_limit() {
        assert_eq!(page_limit(Some(1000), None), Some(1000));
        assert_eq!(page_limit(Some(1000), Some(5)), Some(5));
        assert_eq!(page_limit(None, Some(5)), Some(5));
        assert_eq!(page_limit(None, Some(500)), None);
        assert_eq!(page_limit(None, None), None);
        assert_eq!(page_limit(Some(50), Some(0)), Some(1));
    }

    #[test]
    fn test_fill_template() {
        let item = json!({"namespace": "ns", "name": "my bucket", "size": 3});
        assert_eq!(fill_template("/n/{namespace}/b/{name}", &item), "/n/ns/b/my%20bucket");
        assert_eq!(fill_template("/x/{size}", &item), "/x/3");
        assert_eq!(fill_template("/n/{unknown}/b", &item), "/n/{unknown}/b");
        assert_eq!(fill_template("/open/{brace", &item), "/open/{brace");
    }

    #[test]
    fn test_list_params_maps_key_columns() {
        let table = get_table("oci_core_instance").unwrap();
        let item = MatrixItem::new("us-ashburn-1", Some("ocid1.compartment.oc1..c"), None);
        let ctx = QueryContext::new()
            .with_qual(Qual::equals("lifecycle_state", "running"))
            .with_qual(Qual::equals("display_name", "web-1"));

        let params = list_params(table, &table.list, &item, Some(&ctx));
        assert!(params.contains(&("compartmentId".to_string(), "ocid1.compartment.oc1..c".to_string())));
        assert!(params.contains(&("lifecycleState".to_string(), "RUNNING".to_string())));
        assert!(params.contains(&("displayName".to_string(), "web-1".to_string())));

        let params = list_params(table, &table.list, &item, None);
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_list_params_zone() {
        let table = get_table("oci_core_boot_volume").unwrap();
        let item = MatrixItem::new("us-ashburn-1", Some("ocid1.compartment.oc1..c"), Some("AD-1"));
        let params = list_params(table, &table.list, &item, None);
        assert!(params.contains(&("availabilityDomain".to_string(), "AD-1".to_string())));
    }

    #[test]
    fn test_pinned_parent_matrix_collapses_repeated_requests() {
        let matrix = vec![
            MatrixItem::new("us-ashburn-1", Some("ocid1.tenancy.oc1..root"), None),
            MatrixItem::new("us-ashburn-1", Some("ocid1.compartment.oc1..dev"), None),
            MatrixItem::new("us-phoenix-1", Some("ocid1.tenancy.oc1..root"), None),
        ];

        // Functions are listed by application only, in the application's region
        let functions = get_table("oci_functions_function").unwrap();
        let items = pinned_parent_matrix(&functions.list, "ocid1.fnapp.oc1.iad.app", matrix.clone());
        assert_eq!(items, vec![matrix[0].clone()]);

        // A parent OCID without a region keeps one item per region
        let logs = get_table("oci_logging_log").unwrap();
        let items = pinned_parent_matrix(&logs.list, "ocid1.loggroup.oc1..lg", matrix.clone());
        assert_eq!(items, vec![matrix[0].clone(), matrix[2].clone()]);
    }

    #[test]
    fn test_pinned_parent_matrix_ignores_unsent_zone() {
        let snapshots = get_table("oci_file_storage_snapshot").unwrap();
        let matrix = vec![
            MatrixItem::new("us-ashburn-1", Some("ocid1.tenancy.oc1..root"), Some("AD-1")),
            MatrixItem::new("us-ashburn-1", Some("ocid1.tenancy.oc1..root"), Some("AD-2")),
            MatrixItem::new("us-ashburn-1", Some("ocid1.compartment.oc1..dev"), Some("AD-1")),
        ];
        let items = pinned_parent_matrix(&snapshots.list, "ocid1.filesystem.oc1.iad.fs", matrix);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_pinned_parent_matrix_keeps_sent_params() {
        // A child list that still sends compartment and zone keeps every item
        let mut list = get_table("oci_file_storage_snapshot").unwrap().list.clone();
        list.compartment_param = Some("compartmentId".to_string());
        list.zone_param = "availabilityDomain".to_string();
        let matrix = vec![
            MatrixItem::new("us-ashburn-1", Some("ocid1.tenancy.oc1..root"), Some("AD-1")),
            MatrixItem::new("us-ashburn-1", Some("ocid1.tenancy.oc1..root"), Some("AD-2")),
            MatrixItem::new("us-ashburn-1", Some("ocid1.compartment.oc1..dev"), Some("AD-1")),
        ];
        assert_eq!(pinned_parent_matrix(&list, "ocid1.filesystem.oc1.iad.fs", matrix).len(), 3);
    }

    #[test]
    fn test_transform_row() {
        let table = get_table("oci_core_vcn").unwrap();
        let raw = json!({
            "id": "ocid1.vcn.oc1.iad.abc",
            "displayName": "main",
            "compartmentId": "ocid1.compartment.oc1..own",
            "cidrBlocks": ["10.0.0.0/16"],
            "lifecycleState": "AVAILABLE",
            "timeCreated": "2023-05-01T12:00:00Z",
            "freeformTags": {"env": "prod"},
            "definedTags": {"Ops": {"CostCenter": "7"}}
        });
        let item = MatrixItem::new("us-ashburn-1", Some("ocid1.compartment.oc1..matrix"), None);
        let row = transform_row(table, &raw, &HashMap::new(), &item, "ocid1.tenancy.oc1..t");

        assert_eq!(row["display_name"], "main");
        assert_eq!(row["title"], "main");
        assert_eq!(row["region"], "us-ashburn-1");
        assert_eq!(row["compartment_id"], "ocid1.compartment.oc1..own");
        assert_eq!(row["tenant_id"], "ocid1.tenancy.oc1..t");
        assert_eq!(row["time_created"], "2023-05-01T12:00:00.000Z");
        assert_eq!(row["tags"], json!({"env": "prod", "CostCenter": "7"}));
        assert_eq!(row["cidr_blocks"], json!(["10.0.0.0/16"]));
    }
}
