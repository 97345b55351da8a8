//! Table Registry - Load table definitions from JSON
//!
//! This module loads all OCI table definitions from embedded JSON files
//! and provides lookup functions for the rest of the crate.

use super::column::{ColumnDef, ColumnType, TagSources, Transform};
use crate::oci::client::{is_known_service, PAGE_PARAM};
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

/// Embedded table JSON files (compiled into the binary)
const TABLE_FILES: &[&str] = &[
    include_str!("../resources/identity.json"),
    include_str!("../resources/core.json"),
    include_str!("../resources/network.json"),
    include_str!("../resources/database.json"),
    include_str!("../resources/storage.json"),
    include_str!("../resources/security.json"),
    include_str!("../resources/services.json"),
];

/// The scope a table's list call is repeated over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Once, in the home region, against the tenancy
    Tenancy,
    /// Once per compartment, in the home region
    HomeCompartment,
    /// Once per region, against the tenancy
    Region,
    /// Once per region and compartment
    Compartment,
    /// Once per region, compartment and availability domain
    Zone,
}

fn default_compartment_param() -> Option<String> {
    Some("compartmentId".to_string())
}

fn default_zone_param() -> String {
    "availabilityDomain".to_string()
}

fn default_id() -> String {
    "id".to_string()
}

fn default_page_param() -> String {
    PAGE_PARAM.to_string()
}

fn default_title_field() -> String {
    "displayName".to_string()
}

/// List call definition
#[derive(Debug, Clone, Deserialize)]
pub struct ListDef {
    /// Path on the service endpoint; may use `{namespace}`, `{tenancy}` and
    /// `{parent}` placeholders
    pub path: String,
    /// Where the items live in the response; empty means the body is the array
    #[serde(default)]
    pub response_path: String,
    /// Query param receiving the matrix compartment; `null` to omit
    #[serde(default = "default_compartment_param")]
    pub compartment_param: Option<String>,
    /// Query param receiving the availability domain; empty to omit
    #[serde(default = "default_zone_param")]
    pub zone_param: String,
    #[serde(default)]
    pub static_params: BTreeMap<String, String>,
    /// Maximum `limit` the API accepts
    #[serde(default)]
    pub page_size: Option<u64>,
    /// Query param carrying the page token
    #[serde(default = "default_page_param")]
    pub page_param: String,
    /// Body field holding the next page token, for APIs that do not send
    /// `opc-next-page` (object listings)
    #[serde(default)]
    pub page_token_field: Option<String>,
    /// The response is a single object, not a list
    #[serde(default)]
    pub single: bool,
    /// Items come from listing another table first
    #[serde(default)]
    pub parent: Option<ParentDef>,
}

/// Parent listing for child resources (e.g. API keys per user)
#[derive(Debug, Clone, Deserialize)]
pub struct ParentDef {
    /// Table whose rows drive the child list
    pub table: String,
    /// Raw field of the parent item substituted for `{parent}`
    #[serde(default = "default_id")]
    pub field: String,
    /// Column that, when given with `=`, replaces the parent listing
    pub key_column: String,
}

/// Get-by-id definition
#[derive(Debug, Clone, Deserialize)]
pub struct GetDef {
    /// Path with an `{id}` placeholder
    pub path: String,
    #[serde(default = "default_id")]
    pub key_column: String,
    #[serde(default)]
    pub response_path: String,
}

/// A column whose `=` quals are pushed down as list filters
#[derive(Debug, Clone, Deserialize)]
pub struct KeyColumnDef {
    pub column: String,
    /// Query param the qual maps to; `None` for matrix/get keys
    #[serde(default)]
    pub param: Option<String>,
    /// Queries must supply this column
    #[serde(default)]
    pub required: bool,
    /// OCI enum filters are upper case (`RUNNING`)
    #[serde(default)]
    pub uppercase: bool,
}

/// Per-row enrichment call
#[derive(Debug, Clone, Deserialize)]
pub struct HydrateDef {
    pub name: String,
    /// Path with `{field}` placeholders read from the raw item
    pub path: String,
    #[serde(default)]
    pub response_path: String,
}

/// Table definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct TableDef {
    /// Filled from the JSON map key
    #[serde(skip)]
    pub name: String,
    pub description: String,
    pub service: String,
    pub scope: Scope,
    pub list: ListDef,
    #[serde(default)]
    pub get: Option<GetDef>,
    #[serde(default)]
    pub key_columns: Vec<KeyColumnDef>,
    #[serde(default)]
    pub hydrate: Vec<HydrateDef>,
    /// Tag fields merged into the `tags` column
    #[serde(default)]
    pub tags: Option<TagSources>,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn hydrate_def(&self, name: &str) -> Option<&HydrateDef> {
        self.hydrate.iter().find(|h| h.name == name)
    }

    /// Append the columns every table carries, unless the JSON already
    /// defines them
    fn add_common_columns(&mut self) {
        let mut common = vec![
            ColumnDef::new("title", ColumnType::String, Transform::Title, "Title of the resource."),
            ColumnDef::new(
                "region",
                ColumnType::String,
                Transform::MatrixRegion,
                "The OCI region in which the resource is located.",
            ),
            ColumnDef::new(
                "compartment_id",
                ColumnType::String,
                Transform::MatrixCompartment,
                "The OCID of the compartment in which the resource is located.",
            ),
            ColumnDef::new(
                "tenant_id",
                ColumnType::String,
                Transform::Tenant,
                "The OCID of the tenant in which the resource is located.",
            ),
        ];
        if self.tags.is_some() {
            common.insert(
                1,
                ColumnDef::new("tags", ColumnType::Json, Transform::Tags, "A map of tags for the resource."),
            );
        }

        for column in common {
            if self.column(&column.name).is_none() {
                self.columns.push(column);
            }
        }
    }

    /// Check internal consistency of the definition
    pub fn validate(&self) -> Result<()> {
        if !self.name.starts_with("oci_") {
            bail!("{}: table names must start with oci_", self.name);
        }
        if !is_known_service(&self.service) {
            bail!("{}: unknown service {}", self.name, self.service);
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                bail!("{}: duplicate column {}", self.name, column.name);
            }
            if column.transform == Transform::FromField && column.field.is_none() {
                bail!("{}: column {} uses from_field without a field", self.name, column.name);
            }
            if let Some(hydrate) = &column.hydrate {
                if self.hydrate_def(hydrate).is_none() {
                    bail!("{}: column {} references unknown hydrate {}", self.name, column.name, hydrate);
                }
            }
        }

        for key in &self.key_columns {
            if self.column(&key.column).is_none() {
                bail!("{}: key column {} is not a column", self.name, key.column);
            }
        }
        if let Some(get) = &self.get {
            if !get.path.contains("{id}") {
                bail!("{}: get path has no {{id}} placeholder", self.name);
            }
            if self.column(&get.key_column).is_none() {
                bail!("{}: get key column {} is not a column", self.name, get.key_column);
            }
        }
        if let Some(parent) = &self.list.parent {
            if !self.list.path.contains("{parent}") {
                bail!("{}: parent listing needs a {{parent}} placeholder", self.name);
            }
            if self.column(&parent.key_column).is_none() {
                bail!("{}: parent key column {} is not a column", self.name, parent.key_column);
            }
        }
        // Child tables may take their zone from the parent listing
        if self.scope == Scope::Zone && self.list.zone_param.is_empty() && self.list.parent.is_none() {
            bail!("{}: zone scoped tables need a zone_param", self.name);
        }
        Ok(())
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Registry {
    #[serde(default)]
    pub tables: BTreeMap<String, TableDef>,
}

impl Registry {
    /// Parse, validate and merge table files
    pub fn from_sources(sources: &[&str]) -> Result<Self> {
        let mut registry = Registry::default();
        for content in sources {
            let partial: Registry = serde_json::from_str(content)?;
            for (name, mut table) in partial.tables {
                table.name = name.clone();
                table.add_common_columns();
                table.validate()?;
                registry.tables.insert(name, table);
            }
        }
        Ok(registry)
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get the table registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::from_sources(TABLE_FILES)
            .unwrap_or_else(|e| panic!("Failed to parse embedded table JSON: {}", e))
    })
}

/// Get a table definition by name
pub fn get_table(name: &str) -> Option<&'static TableDef> {
    get_registry().tables.get(name)
}

/// All table names, sorted
pub fn table_names() -> Vec<&'static str> {
    get_registry().tables.keys().map(|s| s.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry();
        assert!(!registry.tables.is_empty(), "Registry should have tables");
    }

    #[test]
    fn test_parent_tables_exist() {
        for table in get_registry().tables.values() {
            if let Some(parent) = &table.list.parent {
                assert!(
                    get_table(&parent.table).is_some(),
                    "{} has unknown parent {}",
                    table.name,
                    parent.table
                );
            }
        }
    }

    #[test]
    fn test_core_instance_definition() {
        let table = get_table("oci_core_instance").expect("instance table should exist");
        assert_eq!(table.service, "core");
        assert_eq!(table.scope, Scope::Compartment);
        assert!(table.get.is_some());
        for common in ["title", "tags", "region", "compartment_id", "tenant_id"] {
            assert!(table.column(common).is_some(), "missing {}", common);
        }
    }

    #[test]
    fn test_table_names_sorted() {
        let names = table_names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"oci_identity_user"));
    }

    /// OCI spells size units in capitals (`sizeInGBs`), which the default
    /// camelCase mapping cannot produce
    #[test]
    fn test_size_columns_read_oci_field_names() {
        use crate::table::fetcher::transform_row;
        use crate::table::matrix::MatrixItem;
        use serde_json::json;
        use std::collections::HashMap;

        let item = MatrixItem::new("us-ashburn-1", Some("ocid1.tenancy.oc1..t"), None);
        let cases = [
            ("oci_core_volume", json!({"sizeInGBs": 50, "vpusPerGB": 10}), "size_in_gbs", json!(50)),
            ("oci_core_volume", json!({"sizeInGBs": 50, "vpusPerGB": 10}), "vpus_per_gb", json!(10)),
            ("oci_core_image", json!({"sizeInMBs": 47694}), "size_in_mbs", json!(47694)),
            ("oci_core_image", json!({"billableSizeInGBs": 3}), "billable_size_in_gbs", json!(3)),
            ("oci_core_volume_backup", json!({"uniqueSizeInGBs": 7}), "unique_size_in_gbs", json!(7)),
            ("oci_functions_function", json!({"memoryInMBs": 128}), "memory_in_mbs", json!(128)),
            (
                "oci_database_autonomous_database",
                json!({"dataStorageSizeInTBs": 1}),
                "data_storage_size_in_tbs",
                json!(1),
            ),
            ("oci_database_db_system", json!({"dataStorageSizeInGBs": 256}), "data_storage_size_in_gbs", json!(256)),
        ];

        for (table_name, raw, column, expected) in cases {
            let table = get_table(table_name).unwrap();
            let row = transform_row(table, &raw, &HashMap::new(), &item, "ocid1.tenancy.oc1..t");
            assert_eq!(row[column], expected, "{}.{}", table_name, column);
        }
    }

    #[test]
    fn test_unit_suffixed_columns_name_their_field() {
        for table in get_registry().tables.values() {
            for column in &table.columns {
                let unit = ["_in_gbs", "_in_mbs", "_in_tbs", "_per_gb"]
                    .iter()
                    .any(|suffix| column.name.ends_with(suffix));
                if unit {
                    assert!(column.field.is_some(), "{}.{} relies on camelCase", table.name, column.name);
                }
            }
        }
    }

    #[test]
    fn test_common_columns_not_duplicated() {
        let registry = Registry::from_sources(&[r#"{
            "tables": {
                "oci_identity_compartment": {
                    "description": "Compartments",
                    "service": "identity",
                    "scope": "tenancy",
                    "list": {"path": "/20160918/compartments"},
                    "columns": [
                        {"name": "id", "type": "string"},
                        {"name": "compartment_id", "type": "string", "description": "Parent"}
                    ]
                }
            }
        }"#])
        .unwrap();

        let table = &registry.tables["oci_identity_compartment"];
        let count = table.columns.iter().filter(|c| c.name == "compartment_id").count();
        assert_eq!(count, 1);
        assert_eq!(table.column("compartment_id").unwrap().description, "Parent");
        assert!(table.column("tags").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let result = Registry::from_sources(&[r#"{
            "tables": {
                "oci_bad": {
                    "description": "Bad",
                    "service": "core",
                    "scope": "compartment",
                    "list": {"path": "/x"},
                    "get": {"path": "/x/id"},
                    "columns": [{"name": "id", "type": "string"}]
                }
            }
        }"#]);
        assert!(result.is_err());
    }
}
