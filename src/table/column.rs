//! Column definitions and transforms
//!
//! A column reads a raw API field (by default the camelCase form of the
//! column name), optionally reshapes it, then coerces it to the column type.

use crate::oci::regions::region_from_ocid;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Column data type as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Bool,
    Int,
    Double,
    Json,
    Timestamp,
    Ip,
    Cidr,
}

/// How a column value is produced from the raw item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Field named by the camelCase form of the column name
    #[default]
    FromCamel,
    /// Field at the explicit `field` path
    FromField,
    /// Merged freeform, defined and system tags
    Tags,
    /// Region of the matrix item
    MatrixRegion,
    /// The item's `compartmentId`, else the matrix compartment
    MatrixCompartment,
    /// Tenancy OCID of the connection
    Tenant,
    /// Region embedded in the item's OCID, else the matrix region
    OcidRegion,
    /// Display name, falling back to name and id
    Title,
}

/// Column definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub transform: Transform,
    /// Dot path into the raw item (or hydrate result); empty takes the
    /// whole value
    #[serde(default)]
    pub field: Option<String>,
    /// Hydrate that supplies this column
    #[serde(default)]
    pub hydrate: Option<String>,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType, transform: Transform, description: &str) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            description: description.to_string(),
            transform,
            field: None,
            hydrate: None,
        }
    }

    /// Raw field path this column reads
    pub fn source_path(&self) -> String {
        self.field
            .clone()
            .unwrap_or_else(|| to_camel_case(&self.name))
    }

    /// Produce the column value for one item
    pub fn value(&self, source: &RowSource<'_>) -> Value {
        let raw = match self.transform {
            Transform::FromCamel | Transform::FromField => {
                let base = match &self.hydrate {
                    Some(name) => match source.hydrated.get(name) {
                        Some(v) => v,
                        None => return Value::Null,
                    },
                    None => source.item,
                };
                let path = self.source_path();
                if path.is_empty() {
                    base.clone()
                } else {
                    lookup_path(base, &path).cloned().unwrap_or(Value::Null)
                }
            },
            Transform::Tags => source
                .tags
                .and_then(|t| t.merged(source.item))
                .map(Value::Object)
                .unwrap_or(Value::Null),
            Transform::MatrixRegion => Value::String(source.region.to_string()),
            Transform::MatrixCompartment => source
                .item
                .get("compartmentId")
                .filter(|v| v.is_string())
                .cloned()
                .or_else(|| source.compartment_id.map(|c| Value::String(c.to_string())))
                .unwrap_or(Value::Null),
            Transform::Tenant => Value::String(source.tenant_id.to_string()),
            Transform::OcidRegion => {
                let from_id = source
                    .item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(region_from_ocid);
                Value::String(from_id.unwrap_or_else(|| source.region.to_string()))
            },
            Transform::Title => [source.title_field, "displayName", "name", "id"]
                .iter()
                .find_map(|f| source.item.get(*f).filter(|v| v.is_string()))
                .cloned()
                .unwrap_or(Value::Null),
        };
        coerce(self.column_type, raw)
    }
}

/// Everything a transform can read
pub struct RowSource<'a> {
    pub item: &'a Value,
    pub hydrated: &'a HashMap<String, Value>,
    pub region: &'a str,
    pub compartment_id: Option<&'a str>,
    pub tenant_id: &'a str,
    pub tags: Option<&'a TagSources>,
    pub title_field: &'a str,
}

fn default_freeform() -> String {
    "freeformTags".to_string()
}

fn default_defined() -> String {
    "definedTags".to_string()
}

/// Raw fields holding a resource's tag maps
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TagSources {
    #[serde(default = "default_freeform")]
    pub freeform: String,
    #[serde(default = "default_defined")]
    pub defined: String,
    /// Only some resources expose system tags
    #[serde(default)]
    pub system: Option<String>,
}

impl Default for TagSources {
    fn default() -> Self {
        Self {
            freeform: default_freeform(),
            defined: default_defined(),
            system: None,
        }
    }
}

impl TagSources {
    /// Merge the item's tag maps
    pub fn merged(&self, item: &Value) -> Option<Map<String, Value>> {
        merge_tags(
            item.get(&self.freeform),
            item.get(&self.defined),
            self.system.as_ref().and_then(|s| item.get(s)),
        )
    }
}

/// Flatten tag maps into one: freeform tags first, then the keys of every
/// defined-tag namespace, then every system-tag namespace. Later sources
/// overwrite earlier keys. `None` when no source is present.
pub fn merge_tags(
    freeform: Option<&Value>,
    defined: Option<&Value>,
    system: Option<&Value>,
) -> Option<Map<String, Value>> {
    let mut tags: Option<Map<String, Value>> = None;

    if let Some(Value::Object(freeform)) = freeform {
        let merged = tags.get_or_insert_with(Map::new);
        for (key, value) in freeform {
            merged.insert(key.clone(), value.clone());
        }
    }

    for namespaced in [defined, system].into_iter().flatten() {
        let Value::Object(namespaces) = namespaced else {
            continue;
        };
        let merged = tags.get_or_insert_with(Map::new);
        for values in namespaces.values() {
            if let Value::Object(values) = values {
                for (key, value) in values {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }

    tags
}

/// Look up a dot-notation path; numeric segments index arrays
pub fn lookup_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;
    for part in path.split('.') {
        current = match (current, part.parse::<usize>()) {
            (Value::Array(arr), Ok(idx)) => arr.get(idx)?,
            _ => current.get(part)?,
        };
    }
    Some(current)
}

/// Coerce a raw value to a column type. Values that cannot be converted
/// are kept as they are rather than dropped.
pub fn coerce(column_type: ColumnType, value: Value) -> Value {
    match (column_type, value) {
        (_, Value::Null) => Value::Null,
        (ColumnType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(s)),
        (ColumnType::Int, Value::Number(n)) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| Value::from(f as i64))
            .unwrap_or(Value::Number(n)),
        (ColumnType::Double, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(s)),
        (ColumnType::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| {
                Value::String(
                    dt.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                )
            })
            .unwrap_or(Value::String(s)),
        (ColumnType::String | ColumnType::Ip | ColumnType::Cidr, v @ (Value::Number(_) | Value::Bool(_))) => {
            Value::String(v.to_string())
        },
        (_, v) => v,
    }
}

/// `lifecycle_state` -> `lifecycleState`
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source<'a>(item: &'a Value, hydrated: &'a HashMap<String, Value>, tags: Option<&'a TagSources>) -> RowSource<'a> {
        RowSource {
            item,
            hydrated,
            region: "us-ashburn-1",
            compartment_id: Some("ocid1.compartment.oc1..matrix"),
            tenant_id: "ocid1.tenancy.oc1..tenant",
            tags,
            title_field: "displayName",
        }
    }

    #[test]
    fn test_case_conversion() {
        assert_eq!(to_camel_case("lifecycle_state"), "lifecycleState");
        assert_eq!(to_camel_case("ipv6_cidr_blocks"), "ipv6CidrBlocks");
        assert_eq!(to_camel_case("id"), "id");
        assert_eq!(to_camel_case("_private"), "private");
    }

    #[test]
    fn test_merge_tags_precedence() {
        let tags = merge_tags(
            Some(&json!({"env": "dev", "owner": "alice"})),
            Some(&json!({"Operations": {"CostCenter": "42", "env": "prod"}})),
            Some(&json!({"orcl-cloud": {"free-tier-retained": "true"}})),
        )
        .unwrap();

        assert_eq!(tags["env"], "prod");
        assert_eq!(tags["owner"], "alice");
        assert_eq!(tags["CostCenter"], "42");
        assert_eq!(tags["free-tier-retained"], "true");
    }

    #[test]
    fn test_merge_tags_absent() {
        assert!(merge_tags(None, None, None).is_none());
        assert!(merge_tags(Some(&Value::Null), Some(&Value::Null), None).is_none());
        assert_eq!(merge_tags(Some(&json!({})), None, None), Some(Map::new()));
    }

    #[test]
    fn test_lookup_path() {
        let item = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(lookup_path(&item, "a.b.1.c"), Some(&json!(2)));
        assert_eq!(lookup_path(&item, "a.x"), None);
        assert_eq!(lookup_path(&item, "a.b.5"), None);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(ColumnType::Int, json!("42")), json!(42));
        assert_eq!(coerce(ColumnType::Int, json!(42.0)), json!(42));
        assert_eq!(coerce(ColumnType::Int, json!("n/a")), json!("n/a"));
        assert_eq!(coerce(ColumnType::Double, json!("1.5")), json!(1.5));
        assert_eq!(coerce(ColumnType::Bool, json!("TRUE")), json!(true));
        assert_eq!(coerce(ColumnType::String, json!(7)), json!("7"));
        assert_eq!(coerce(ColumnType::Json, json!({"x": 1})), json!({"x": 1}));
        assert_eq!(coerce(ColumnType::Timestamp, Value::Null), Value::Null);
        assert_eq!(
            coerce(ColumnType::Timestamp, json!("2024-03-01T10:00:00+02:00")),
            json!("2024-03-01T08:00:00.000Z")
        );
        assert_eq!(coerce(ColumnType::Timestamp, json!("yesterday")), json!("yesterday"));
    }

    #[test]
    fn test_column_transforms() {
        let item = json!({
            "id": "ocid1.instance.oc1.phx.abc",
            "displayName": "web-1",
            "lifecycleState": "RUNNING",
            "sourceDetails": {"imageId": "ocid1.image.oc1.phx.img"},
            "freeformTags": {"team": "core"}
        });
        let hydrated = HashMap::from([("get_details".to_string(), json!({"sizeInGBs": "50"}))]);
        let tags = TagSources::default();
        let src = source(&item, &hydrated, Some(&tags));

        let col = ColumnDef::new("lifecycle_state", ColumnType::String, Transform::FromCamel, "");
        assert_eq!(col.value(&src), json!("RUNNING"));

        let mut col = ColumnDef::new("image_id", ColumnType::String, Transform::FromField, "");
        col.field = Some("sourceDetails.imageId".to_string());
        assert_eq!(col.value(&src), json!("ocid1.image.oc1.phx.img"));

        let mut col = ColumnDef::new("size_in_gbs", ColumnType::Int, Transform::FromField, "");
        col.field = Some("sizeInGBs".to_string());
        col.hydrate = Some("get_details".to_string());
        assert_eq!(col.value(&src), json!(50));

        let col = ColumnDef::new("tags", ColumnType::Json, Transform::Tags, "");
        assert_eq!(col.value(&src), json!({"team": "core"}));

        let col = ColumnDef::new("compartment_id", ColumnType::String, Transform::MatrixCompartment, "");
        assert_eq!(col.value(&src), json!("ocid1.compartment.oc1..matrix"));

        let col = ColumnDef::new("region", ColumnType::String, Transform::OcidRegion, "");
        assert_eq!(col.value(&src), json!("us-phoenix-1"));

        let col = ColumnDef::new("title", ColumnType::String, Transform::Title, "");
        assert_eq!(col.value(&src), json!("web-1"));

        let col = ColumnDef::new("tenant_id", ColumnType::String, Transform::Tenant, "");
        assert_eq!(col.value(&src), json!("ocid1.tenancy.oc1..tenant"));
    }

    #[test]
    fn test_missing_hydrate_yields_null() {
        let item = json!({"id": "x"});
        let hydrated = HashMap::new();
        let src = source(&item, &hydrated, None);
        let mut col = ColumnDef::new("versioning", ColumnType::String, Transform::FromCamel, "");
        col.hydrate = Some("get_bucket".to_string());
        assert_eq!(col.value(&src), Value::Null);

        let col = ColumnDef::new("tags", ColumnType::Json, Transform::Tags, "");
        assert_eq!(col.value(&src), Value::Null);
    }

    #[test]
    fn test_empty_field_takes_whole_hydrate() {
        let item = json!({"id": "nsg"});
        let hydrated = HashMap::from([("list_rules".to_string(), json!([{"direction": "INGRESS"}]))]);
        let src = source(&item, &hydrated, None);
        let mut col = ColumnDef::new("rules", ColumnType::Json, Transform::FromField, "");
        col.field = Some(String::new());
        col.hydrate = Some("list_rules".to_string());
        assert_eq!(col.value(&src), json!([{"direction": "INGRESS"}]));
    }
}
