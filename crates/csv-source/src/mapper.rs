//! Coercion of raw fields into typed rows.

use ingest_core::{ColumnType, TableSpec, TypedRow, TypedValue};
use uuid::Uuid;

/// Result of mapping one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped {
    Row(TypedRow),
    /// A non-nullable column resolved to null
    Rejected { column: String },
}

/// Map raw fields to a typed row following the table's column specs.
pub fn map_row(fields: &[String], spec: &TableSpec) -> Mapped {
    let mut values = Vec::with_capacity(spec.columns.len());

    for column in &spec.columns {
        let raw = fields
            .get(column.source_position)
            .map(|f| f.trim())
            .unwrap_or("");
        let value = coerce(raw, &column.column_type);
        if value.is_null() && !column.nullable {
            return Mapped::Rejected {
                column: column.name.clone(),
            };
        }
        values.push(value);
    }

    Mapped::Row(TypedRow::new(values))
}

/// Coerce one trimmed field; empty or unparsable input is null.
pub fn coerce(raw: &str, column_type: &ColumnType) -> TypedValue {
    if raw.is_empty() {
        return TypedValue::Null;
    }
    match column_type {
        ColumnType::Int => parse_int(raw).map_or(TypedValue::Null, TypedValue::Int),
        ColumnType::Float => parse_float(raw).map_or(TypedValue::Null, TypedValue::Float),
        ColumnType::Uuid => parse_uuid(raw).map_or(TypedValue::Null, TypedValue::Uuid),
        ColumnType::String { max_len } => {
            TypedValue::Text(truncate_chars(raw, *max_len as usize).to_string())
        }
    }
}

/// Parse the leading `[+-]?[0-9]+` prefix as an i32.
pub fn parse_int(raw: &str) -> Option<i32> {
    let bytes = raw.as_bytes();
    let sign = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let digits = bytes[sign..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    raw[..sign + digits].parse().ok()
}

/// Parse the longest leading decimal prefix as a finite f64.
pub fn parse_float(raw: &str) -> Option<f64> {
    let bytes = raw.as_bytes();
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end.min(bytes.len())..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    raw[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Accept only the canonical hyphenated 8-4-4-4-12 form.
pub fn parse_uuid(raw: &str) -> Option<Uuid> {
    let bytes = raw.as_bytes();
    if bytes.len() != 36 {
        return None;
    }
    let canonical = bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    });
    if !canonical {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

/// The first `max_chars` characters of `value`.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::ColumnSpec;

    fn spec() -> TableSpec {
        TableSpec::new(
            "appeals",
            "dbo.philly_appeals.csv",
            vec![
                ColumnSpec::required(2, "objectid", ColumnType::Int),
                ColumnSpec::nullable(0, "address", ColumnType::string(5)),
                ColumnSpec::nullable(1, "lat", ColumnType::Float),
            ],
        )
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_maps_in_column_order() {
        let mapped = map_row(&strings(&["1234 MARKET", " 39.9 ", "77"]), &spec());
        assert_eq!(
            mapped,
            Mapped::Row(TypedRow::new(vec![
                TypedValue::Int(77),
                TypedValue::Text("1234 ".to_string()),
                TypedValue::Float(39.9),
            ]))
        );
    }

    #[test]
    fn test_missing_required_key_rejects_row() {
        for key in ["", "   ", "n/a"] {
            let mapped = map_row(&strings(&["addr", "1.0", key]), &spec());
            assert_eq!(
                mapped,
                Mapped::Rejected {
                    column: "objectid".to_string()
                },
                "key {key:?}"
            );
        }
        // Field missing entirely
        let mapped = map_row(&strings(&["addr"]), &spec());
        assert!(matches!(mapped, Mapped::Rejected { .. }));
    }

    #[test]
    fn test_nullable_columns_accept_null() {
        let mapped = map_row(&strings(&["", "abc", "5"]), &spec());
        assert_eq!(
            mapped,
            Mapped::Row(TypedRow::new(vec![
                TypedValue::Int(5),
                TypedValue::Null,
                TypedValue::Null,
            ]))
        );
    }

    #[test]
    fn test_parse_int_prefix() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int("+3"), Some(3));
        assert_eq!(parse_int("12abc"), Some(12));
        assert_eq!(parse_int("1.5"), Some(1));
        assert_eq!(parse_int("abc"), None);
        assert_eq!(parse_int("-"), None);
        assert_eq!(parse_int("3000000000"), None);
    }

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float("39.95"), Some(39.95));
        assert_eq!(parse_float("-75.1"), Some(-75.1));
        assert_eq!(parse_float(".5"), Some(0.5));
        assert_eq!(parse_float("5."), Some(5.0));
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("1.5e"), Some(1.5));
        assert_eq!(parse_float("2.5 sqft"), Some(2.5));
        assert_eq!(parse_float("."), None);
        assert_eq!(parse_float("NaN"), None);
        assert_eq!(parse_float("inf"), None);
        assert_eq!(parse_float("1e400"), None);
    }

    #[test]
    fn test_parse_uuid_canonical_only() {
        let canonical = "6F9619FF-8B86-D011-B42D-00C04FC964FF";
        assert_eq!(
            parse_uuid(canonical),
            Some(Uuid::parse_str(canonical).unwrap())
        );
        assert!(parse_uuid(&canonical.to_lowercase()).is_some());
        assert_eq!(parse_uuid("6F9619FF8B86D011B42D00C04FC964FF"), None);
        assert_eq!(parse_uuid("{6F9619FF-8B86-D011-B42D-00C04FC964FF}"), None);
        assert_eq!(parse_uuid("6F9619FF-8B86-D011-B42D-00C04FC964FG"), None);
    }

    #[test]
    fn test_truncation_keeps_prefix() {
        assert_eq!(truncate_chars("abcdefgh", 3), "abc");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("ñandú", 2), "ña");
        assert_eq!(
            coerce("PHILADELPHIA", &ColumnType::string(5)),
            TypedValue::Text("PHILA".to_string())
        );
    }
}
