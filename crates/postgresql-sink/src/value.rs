//! Conversion of typed values into PostgreSQL parameters.

use ingest_core::{ColumnType, TableSpec, TypedRow, TypedValue};
use postgres_types::{ToSql, Type};

/// PostgreSQL wire type for a column.
pub fn pg_type(column_type: &ColumnType) -> Type {
    match column_type {
        ColumnType::Int => Type::INT4,
        ColumnType::Float => Type::FLOAT8,
        ColumnType::String { .. } => Type::VARCHAR,
        ColumnType::Uuid => Type::UUID,
    }
}

/// Wire types for every column of a table, in column order.
pub fn column_types(spec: &TableSpec) -> Vec<Type> {
    spec.columns.iter().map(|c| pg_type(&c.column_type)).collect()
}

/// Box a value as a parameter; nulls carry the column's type so the server
/// accepts them for any column.
pub fn to_boxed(value: &TypedValue, column_type: &ColumnType) -> Box<dyn ToSql + Sync + Send> {
    match value {
        TypedValue::Int(i) => Box::new(*i),
        TypedValue::Float(f) => Box::new(*f),
        TypedValue::Text(s) => Box::new(s.clone()),
        TypedValue::Uuid(u) => Box::new(*u),
        TypedValue::Null => match column_type {
            ColumnType::Int => Box::new(None::<i32>),
            ColumnType::Float => Box::new(None::<f64>),
            ColumnType::String { .. } => Box::new(None::<String>),
            ColumnType::Uuid => Box::new(None::<uuid::Uuid>),
        },
    }
}

/// Parameters for a set of rows, row-major.
pub fn row_params(spec: &TableSpec, rows: &[TypedRow]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    let mut params = Vec::with_capacity(rows.len() * spec.columns.len());
    for row in rows {
        for (index, column) in spec.columns.iter().enumerate() {
            let value = row.get(index).unwrap_or(&TypedValue::Null);
            params.push(to_boxed(value, &column.column_type));
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::ColumnSpec;

    fn spec() -> TableSpec {
        TableSpec::new(
            "t",
            "t.csv",
            vec![
                ColumnSpec::required(0, "id", ColumnType::Int),
                ColumnSpec::nullable(1, "area", ColumnType::Float),
                ColumnSpec::nullable(2, "name", ColumnType::string(20)),
                ColumnSpec::nullable(3, "guid", ColumnType::Uuid),
            ],
        )
    }

    #[test]
    fn test_pg_types() {
        assert_eq!(
            column_types(&spec()),
            vec![Type::INT4, Type::FLOAT8, Type::VARCHAR, Type::UUID]
        );
    }

    #[test]
    fn test_row_params_in_column_order() {
        let s = spec();
        let guid = uuid::Uuid::nil();
        let row = TypedRow::new(vec![
            TypedValue::Int(1),
            TypedValue::Null,
            TypedValue::Text("x".into()),
            TypedValue::Uuid(guid),
        ]);
        let rendered: Vec<String> = row_params(&s, &[row])
            .iter()
            .map(|p| format!("{p:?}"))
            .collect();
        assert_eq!(rendered[0], "1");
        assert_eq!(rendered[1], "None");
        assert_eq!(rendered[2], "\"x\"");
        assert_eq!(rendered[3], format!("{guid:?}"));
    }

    #[test]
    fn test_short_rows_are_padded_with_nulls() {
        let s = spec();
        let row = TypedRow::new(vec![TypedValue::Int(1)]);
        assert_eq!(row_params(&s, &[row]).len(), 4);
    }
}
