//! SQL text for grouped inserts, bulk copy and table maintenance.

use ingest_core::{ColumnType, TableSpec, ToDdl};
use table_sink::OnConflict;

/// PostgreSQL's limit on bind parameters per statement.
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(spec: &TableSpec) -> String {
    spec.columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Largest number of rows one INSERT statement can carry for this table.
pub fn max_rows_per_statement(spec: &TableSpec) -> usize {
    (MAX_BIND_PARAMETERS / spec.columns.len().max(1)).max(1)
}

/// Multi-row INSERT with `$n` placeholders for `row_count` rows.
pub fn insert_statement(spec: &TableSpec, row_count: usize, on_conflict: OnConflict) -> String {
    let col_count = spec.columns.len();
    let mut placeholders: Vec<String> = Vec::with_capacity(row_count);
    let mut param_idx = 1;

    for _ in 0..row_count {
        let row_placeholders: Vec<String> = (0..col_count)
            .map(|_| {
                let p = format!("${param_idx}");
                param_idx += 1;
                p
            })
            .collect();
        placeholders.push(format!("({})", row_placeholders.join(", ")));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(&spec.name),
        column_list(spec),
        placeholders.join(", ")
    );
    if on_conflict == OnConflict::Ignore {
        sql.push_str(" ON CONFLICT DO NOTHING");
    }
    sql
}

pub fn copy_statement(spec: &TableSpec) -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_ident(&spec.name),
        column_list(spec)
    )
}

pub fn truncate_statement(table: &str) -> String {
    format!("TRUNCATE TABLE {}", quote_ident(table))
}

pub fn count_statement(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

/// PostgreSQL DDL generator.
pub struct PostgresDdl;

impl ToDdl for PostgresDdl {
    fn to_ddl(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::Float => "DOUBLE PRECISION".to_string(),
            ColumnType::String { max_len } => format!("VARCHAR({max_len})"),
            ColumnType::Uuid => "UUID".to_string(),
        }
    }
}

impl PostgresDdl {
    /// `CREATE TABLE IF NOT EXISTS` with the table's primary key.
    pub fn create_table(&self, spec: &TableSpec) -> String {
        let mut defs: Vec<String> = spec
            .columns
            .iter()
            .map(|c| {
                let null_clause = if c.nullable { "NULL" } else { "NOT NULL" };
                format!(
                    "  {} {} {}",
                    quote_ident(&c.name),
                    self.to_ddl(&c.column_type),
                    null_clause
                )
            })
            .collect();

        if !spec.primary_key.is_empty() {
            let pk: Vec<String> = spec.primary_key.iter().map(|c| quote_ident(c)).collect();
            defs.push(format!("  PRIMARY KEY ({})", pk.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            quote_ident(&spec.name),
            defs.join(",\n")
        )
    }
}
