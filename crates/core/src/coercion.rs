use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::model::{CellValue, Column, ColumnType, RowValues};

/// Converts the text typed into a cell into the value stored for the column's type.
/// Boolean cells are never typed: an edit flips the current value.
#[must_use]
pub fn coerce_edit(column_type: ColumnType, raw: &str, current: Option<&CellValue>) -> CellValue {
    match column_type {
        ColumnType::Number => CellValue::Number(parse_number(raw)),
        ColumnType::Boolean => toggle(current),
        ColumnType::Text | ColumnType::Date | ColumnType::Select | ColumnType::Multiselect => {
            CellValue::Text(raw.to_string())
        }
    }
}

#[must_use]
pub fn toggle(current: Option<&CellValue>) -> CellValue {
    CellValue::Bool(!current.is_some_and(CellValue::is_truthy))
}

/// Reads the longest numeric prefix of `raw`; anything unparsable, empty or non-finite is 0.
#[must_use]
pub fn parse_number(raw: &str) -> f64 {
    let candidate = numeric_prefix(raw.trim_start());
    match candidate.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

fn numeric_prefix(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let integer_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut has_digits = end > integer_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let fraction_start = end + 1;
        let mut cursor = fraction_start;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        if has_digits || cursor > fraction_start {
            has_digits = true;
            end = cursor;
        }
    }

    if !has_digits {
        return "";
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut cursor = end + 1;
        if matches!(bytes.get(cursor), Some(b'+' | b'-')) {
            cursor += 1;
        }
        let exponent_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        if cursor > exponent_start {
            end = cursor;
        }
    }

    &raw[..end]
}

#[must_use]
pub fn default_value(column_type: ColumnType, now: DateTime<Utc>) -> CellValue {
    match column_type {
        ColumnType::Text => CellValue::Text(String::new()),
        ColumnType::Number => CellValue::Number(0.0),
        ColumnType::Date => CellValue::Text(iso_timestamp(now)),
        ColumnType::Boolean => CellValue::Bool(false),
        ColumnType::Select | ColumnType::Multiselect => CellValue::Null,
    }
}

#[must_use]
pub fn default_row(columns: &[Column], now: DateTime<Utc>) -> RowValues {
    columns
        .iter()
        .map(|column| (column.id.clone(), default_value(column.column_type, now)))
        .collect()
}

#[must_use]
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[must_use]
pub fn format_date_for_display(raw: &str) -> String {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return timestamp.format("%Y-%m-%d").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        coerce_edit, default_row, default_value, format_date_for_display, parse_number, toggle,
    };
    use crate::model::{CellValue, Column, ColumnType};

    #[test]
    fn numbers_parse_like_a_float_prefix() {
        assert!((parse_number("12.5") - 12.5).abs() < f64::EPSILON);
        assert!((parse_number("  7kg") - 7.0).abs() < f64::EPSILON);
        assert!((parse_number("-3e2") + 300.0).abs() < f64::EPSILON);
        assert!((parse_number(".5") - 0.5).abs() < f64::EPSILON);
        assert!((parse_number("4.") - 4.0).abs() < f64::EPSILON);
        assert!((parse_number("2e") - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_numbers_become_zero() {
        for raw in ["", "abc", "-", ".", "1e999", "Infinity"] {
            assert_eq!(parse_number(raw), 0.0, "input {raw:?}");
        }
    }

    #[test]
    fn coercing_a_number_twice_is_stable() {
        let first = coerce_edit(ColumnType::Number, "41.75", None);
        let second = coerce_edit(ColumnType::Number, &first.to_string(), Some(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn boolean_edits_toggle_and_return_after_two_flips() {
        let start = CellValue::Bool(false);
        let once = coerce_edit(ColumnType::Boolean, "ignored", Some(&start));
        assert_eq!(once, CellValue::Bool(true));
        let twice = coerce_edit(ColumnType::Boolean, "ignored", Some(&once));
        assert_eq!(twice, start);
        assert_eq!(toggle(None), CellValue::Bool(true));
        assert_eq!(toggle(Some(&CellValue::Null)), CellValue::Bool(true));
    }

    #[test]
    fn text_like_types_store_raw_input() {
        for column_type in [
            ColumnType::Text,
            ColumnType::Date,
            ColumnType::Select,
            ColumnType::Multiselect,
        ] {
            assert_eq!(
                coerce_edit(column_type, " 12 ", None),
                CellValue::Text(" 12 ".to_string())
            );
        }
    }

    #[test]
    fn defaults_per_column_type() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(default_value(ColumnType::Text, now), CellValue::from(""));
        assert_eq!(default_value(ColumnType::Number, now), CellValue::Number(0.0));
        assert_eq!(
            default_value(ColumnType::Date, now),
            CellValue::from("2024-03-09T14:05:00.000Z")
        );
        assert_eq!(default_value(ColumnType::Boolean, now), CellValue::Bool(false));
        assert_eq!(default_value(ColumnType::Select, now), CellValue::Null);
        assert_eq!(default_value(ColumnType::Multiselect, now), CellValue::Null);
    }

    #[test]
    fn default_row_covers_every_column() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        let columns = vec![
            Column {
                id: "a".to_string(),
                name: "Nombre".to_string(),
                column_type: ColumnType::Text,
                options: None,
            },
            Column {
                id: "b".to_string(),
                name: "Pagado".to_string(),
                column_type: ColumnType::Boolean,
                options: None,
            },
        ];
        let row = default_row(&columns, now);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("b"), Some(&CellValue::Bool(false)));
    }

    #[test]
    fn dates_display_as_calendar_days() {
        assert_eq!(format_date_for_display("2024-03-09T14:05:00.000Z"), "2024-03-09");
        assert_eq!(format_date_for_display("2024-03-09"), "2024-03-09");
        assert_eq!(format_date_for_display("mañana"), "mañana");
    }
}
