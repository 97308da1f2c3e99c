//! Table specifications and the schema registry.
//!
//! A [`TableSpec`] maps positional fields of one source file to typed target
//! columns. The [`TableRegistry`] is the ordered, validated set of table specs
//! for a run; it is loaded once from YAML and never mutated afterwards.

use crate::types::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Error Types
// ============================================================================

/// Error type for schema operations.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Error reading schema file
    #[error("Failed to read schema file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Table not found in registry
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Two tables share a name
    #[error("Duplicate table: {0}")]
    DuplicateTable(String),

    /// Two columns of one table share a name
    #[error("Duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    /// A table declares no columns
    #[error("Table '{0}' has no columns")]
    NoColumns(String),

    /// A string column declares a zero length
    #[error("Column '{column}' in table '{table}' has zero length")]
    ZeroLength { table: String, column: String },

    /// Primary key refers to an unknown or nullable column
    #[error("Primary key column '{column}' in table '{table}' is {reason}")]
    InvalidPrimaryKey {
        table: String,
        column: String,
        reason: &'static str,
    },
}

// ============================================================================
// Column and table specs
// ============================================================================

fn default_nullable() -> bool {
    true
}

/// Mapping of one source field to one typed target column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    /// Zero-based position of the field in the source record
    #[serde(rename = "source")]
    pub source_position: usize,

    /// Target column name
    pub name: String,

    /// Target column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether the column may hold null; a null in a non-nullable column
    /// rejects the whole row
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnSpec {
    /// Create a new nullable column spec.
    pub fn nullable(
        source_position: usize,
        name: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        Self {
            source_position,
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Create a new non-nullable column spec.
    pub fn required(
        source_position: usize,
        name: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        Self {
            source_position,
            name: name.into(),
            column_type,
            nullable: false,
        }
    }
}

/// Static schema and column mapping for one ingested dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSpec {
    /// Target table name
    pub name: String,

    /// Source file name, relative to the run's data directory
    pub source_file: PathBuf,

    /// Primary key columns (used for DDL and duplicate detection)
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Ordered column specs; typed rows follow this order
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Create a new table spec.
    pub fn new(
        name: impl Into<String>,
        source_file: impl Into<PathBuf>,
        columns: Vec<ColumnSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            primary_key: Vec::new(),
            columns,
        }
    }

    /// Set the primary key columns.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Index of a column in row order.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Row indexes of the primary key columns.
    pub fn primary_key_indexes(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect()
    }

    /// Check the internal consistency of this table spec.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            if column.column_type.max_len() == Some(0) {
                return Err(SchemaError::ZeroLength {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        for key in &self.primary_key {
            match self.get_column(key) {
                None => {
                    return Err(SchemaError::InvalidPrimaryKey {
                        table: self.name.clone(),
                        column: key.clone(),
                        reason: "not a column",
                    })
                }
                Some(column) if column.nullable => {
                    return Err(SchemaError::InvalidPrimaryKey {
                        table: self.name.clone(),
                        column: key.clone(),
                        reason: "nullable",
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Ordered, validated collection of table specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRegistry {
    /// Table specs in load order
    pub tables: Vec<TableSpec>,

    /// Cached table lookup (not serialized)
    #[serde(skip)]
    table_map: HashMap<String, usize>,
}

impl TableRegistry {
    /// Create a registry from table specs, validating every spec.
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, SchemaError> {
        let mut registry = Self {
            tables,
            table_map: HashMap::new(),
        };
        registry.build_table_map()?;
        Ok(registry)
    }

    /// Load a registry from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a registry from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let mut registry: TableRegistry = serde_yaml::from_str(yaml)?;
        registry.build_table_map()?;
        Ok(registry)
    }

    /// Validate every table and build the internal lookup map.
    fn build_table_map(&mut self) -> Result<(), SchemaError> {
        let mut table_map = HashMap::with_capacity(self.tables.len());
        for (idx, table) in self.tables.iter().enumerate() {
            table.validate()?;
            if table_map.insert(table.name.clone(), idx).is_some() {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }
        self.table_map = table_map;
        Ok(())
    }

    /// Get a table spec by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSpec> {
        self.table_map
            .get(name)
            .and_then(|&idx| self.tables.get(idx))
    }

    /// All table names in load order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Select table specs by name, keeping registry order.
    ///
    /// An empty selection returns every table.
    pub fn select(&self, names: &[String]) -> Result<Vec<&TableSpec>, SchemaError> {
        if names.is_empty() {
            return Ok(self.tables.iter().collect());
        }

        for name in names {
            if !self.table_map.contains_key(name) {
                return Err(SchemaError::TableNotFound(name.clone()));
            }
        }

        Ok(self
            .tables
            .iter()
            .filter(|t| names.iter().any(|n| n == &t.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_REGISTRY: &str = r#"
tables:
  - name: demolitions
    source_file: dbo.philly_demolitions.csv
    primary_key: [objectid]
    columns:
      - { source: 20, name: objectid, type: int, nullable: false }
      - { source: 0, name: address, type: varchar(200) }
      - { source: 17, name: geocode_x, type: float }
  - name: master_address
    source_file: dbo.masteraddress.csv
    primary_key: [master_address_id]
    columns:
      - { source: 0, name: master_address_id, type: uuid, nullable: false }
      - source: 1
        name: address_text
        type:
          type: varchar
          length: 400
"#;

    #[test]
    fn test_parse_registry() {
        let registry = TableRegistry::from_yaml(SAMPLE_REGISTRY).unwrap();
        assert_eq!(registry.tables.len(), 2);
        assert_eq!(registry.table_names(), vec!["demolitions", "master_address"]);

        let demolitions = registry.get_table("demolitions").unwrap();
        assert_eq!(demolitions.columns.len(), 3);
        assert_eq!(demolitions.columns[0].source_position, 20);
        assert!(!demolitions.columns[0].nullable);
        assert!(demolitions.columns[1].nullable);
        assert_eq!(demolitions.columns[1].column_type, ColumnType::string(200));
        assert_eq!(demolitions.primary_key_indexes(), vec![0]);

        let addresses = registry.get_table("master_address").unwrap();
        assert_eq!(addresses.columns[1].column_type, ColumnType::string(400));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_REGISTRY.as_bytes()).unwrap();
        let registry = TableRegistry::from_file(file.path()).unwrap();
        assert!(registry.get_table("master_address").is_some());
    }

    #[test]
    fn test_select_keeps_registry_order() {
        let registry = TableRegistry::from_yaml(SAMPLE_REGISTRY).unwrap();
        let selected = registry
            .select(&["master_address".to_string(), "demolitions".to_string()])
            .unwrap();
        let names: Vec<_> = selected.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["demolitions", "master_address"]);

        assert_eq!(registry.select(&[]).unwrap().len(), 2);
    }

    #[test]
    fn test_select_unknown_table() {
        let registry = TableRegistry::from_yaml(SAMPLE_REGISTRY).unwrap();
        let result = registry.select(&["nope".to_string()]);
        assert!(matches!(result, Err(SchemaError::TableNotFound(_))));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let spec = TableSpec::new(
            "t",
            "t.csv",
            vec![
                ColumnSpec::required(0, "id", ColumnType::Int),
                ColumnSpec::nullable(1, "id", ColumnType::Float),
            ],
        );
        assert!(matches!(
            TableRegistry::new(vec![spec]),
            Err(SchemaError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let spec = TableSpec::new(
            "t",
            "t.csv",
            vec![ColumnSpec::required(0, "id", ColumnType::Int)],
        );
        assert!(matches!(
            TableRegistry::new(vec![spec.clone(), spec]),
            Err(SchemaError::DuplicateTable(_))
        ));
    }

    #[test]
    fn test_nullable_primary_key_rejected() {
        let spec = TableSpec::new(
            "t",
            "t.csv",
            vec![ColumnSpec::nullable(0, "id", ColumnType::Int)],
        )
        .with_primary_key(["id"]);
        assert!(matches!(
            spec.validate(),
            Err(SchemaError::InvalidPrimaryKey { reason: "nullable", .. })
        ));
    }

    #[test]
    fn test_unknown_primary_key_rejected() {
        let spec = TableSpec::new(
            "t",
            "t.csv",
            vec![ColumnSpec::required(0, "id", ColumnType::Int)],
        )
        .with_primary_key(["missing"]);
        assert!(matches!(
            spec.validate(),
            Err(SchemaError::InvalidPrimaryKey { reason: "not a column", .. })
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        let spec = TableSpec::new(
            "t",
            "t.csv",
            vec![ColumnSpec::nullable(0, "name", ColumnType::string(0))],
        );
        assert!(matches!(spec.validate(), Err(SchemaError::ZeroLength { .. })));
    }

    #[test]
    fn test_empty_table_rejected() {
        let spec = TableSpec::new("t", "t.csv", vec![]);
        assert!(matches!(spec.validate(), Err(SchemaError::NoColumns(_))));
    }
}
