//! Column types for the ingestion pipeline.
//!
//! `ColumnType` is the closed set of target types a source field can be coerced
//! into. Each store derives its DDL from it via the [`ToDdl`] trait.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Target type of a single column.
///
/// # YAML Format
///
/// Simple types are plain strings:
/// ```yaml
/// type: int
/// type: float
/// type: uuid
/// ```
///
/// Bounded strings use either the object format or the compact form:
/// ```yaml
/// type:
///   type: varchar
///   length: 200
/// type: varchar(200)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 32-bit signed integer
    Int,

    /// 64-bit IEEE 754 floating point
    Float,

    /// Variable-length string holding at most `max_len` characters
    String {
        /// Maximum number of characters; longer values are truncated
        max_len: u32,
    },

    /// Canonical 8-4-4-4-12 UUID
    Uuid,
}

impl ColumnType {
    /// Create a bounded string type.
    pub fn string(max_len: u32) -> Self {
        Self::String { max_len }
    }

    /// Maximum character length for string columns.
    pub fn max_len(&self) -> Option<usize> {
        match self {
            Self::String { max_len } => Some(*max_len as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::String { max_len } => write!(f, "varchar({max_len})"),
            Self::Uuid => f.write_str("uuid"),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            Self::Int => serializer.serialize_str("int"),
            Self::Float => serializer.serialize_str("float"),
            Self::Uuid => serializer.serialize_str("uuid"),
            Self::String { max_len } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "varchar")?;
                map.serialize_entry("length", max_len)?;
                map.end()
            }
        }
    }
}

/// Parse the compact `varchar(N)` / `nvarchar(N)` form.
fn parse_compact_varchar(value: &str) -> Option<u32> {
    let inner = value
        .strip_prefix("varchar(")
        .or_else(|| value.strip_prefix("nvarchar("))?
        .strip_suffix(')')?;
    inner.trim().parse().ok()
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{Error, MapAccess, Visitor};

        struct ColumnTypeVisitor;

        impl<'de> Visitor<'de> for ColumnTypeVisitor {
            type Value = ColumnType;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or map representing a column type")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                let lowered = value.trim().to_ascii_lowercase();
                match lowered.as_str() {
                    "int" | "integer" => Ok(ColumnType::Int),
                    "float" | "double" => Ok(ColumnType::Float),
                    "uuid" | "uniqueidentifier" => Ok(ColumnType::Uuid),
                    other => parse_compact_varchar(other)
                        .map(|max_len| ColumnType::String { max_len })
                        .ok_or_else(|| E::custom(format!("unknown column type: {value}"))),
                }
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut type_name: Option<String> = None;
                let mut fields: HashMap<String, serde_yaml::Value> = HashMap::new();

                while let Some(key) = map.next_key::<String>()? {
                    if key == "type" {
                        type_name = Some(map.next_value()?);
                    } else {
                        fields.insert(key, map.next_value()?);
                    }
                }

                let type_name = type_name.ok_or_else(|| M::Error::missing_field("type"))?;

                match type_name.as_str() {
                    "int" | "integer" => Ok(ColumnType::Int),
                    "float" | "double" => Ok(ColumnType::Float),
                    "uuid" | "uniqueidentifier" => Ok(ColumnType::Uuid),
                    "varchar" | "var_char" | "nvarchar" | "string" => {
                        let length = fields
                            .get("length")
                            .ok_or_else(|| M::Error::missing_field("length"))?;
                        let max_len: u32 = serde_yaml::from_value(length.clone())
                            .map_err(|e| M::Error::custom(format!("invalid field 'length': {e}")))?;
                        Ok(ColumnType::String { max_len })
                    }
                    _ => Err(M::Error::custom(format!("unknown type: {type_name}"))),
                }
            }
        }

        deserializer.deserialize_any(ColumnTypeVisitor)
    }
}

/// Trait for generating DDL type definitions from `ColumnType`.
pub trait ToDdl {
    /// Generate the DDL type definition for the given column type.
    fn to_ddl(&self, column_type: &ColumnType) -> String;
}
