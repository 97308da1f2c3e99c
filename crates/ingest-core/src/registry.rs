//! Built-in registry of the Philadelphia civic datasets.

use crate::schema::{SchemaError, TableRegistry};

/// YAML source of the built-in registry.
pub const PHILADELPHIA_REGISTRY_YAML: &str = include_str!("../schema/philadelphia.yaml");

/// Load the built-in registry of the ten Philadelphia datasets.
pub fn philadelphia() -> Result<TableRegistry, SchemaError> {
    TableRegistry::from_yaml(PHILADELPHIA_REGISTRY_YAML)
}
