//! Field mapping between local records and the spreadsheet schema.
//!
//! Local records use snake_case names; spreadsheet columns are camelCase and
//! a few are named differently altogether (`staff_name` is the
//! `employeeName` column). Keys missing from the table pass through as-is.
//!
//! Spreadsheets also turn `HH:mm` text into date-time serials behind our
//! back, so both directions repair time-only fields.

use serde_json::Value;

use crate::model::Record;

/// `(local, remote)` name pairs.
const FIELD_MAP: &[(&str, &str)] = &[
    ("generic_name", "genericName"),
    ("sales_status", "salesStatus"),
    ("discontinuation_date", "discontinuationDate"),
    ("alternative_medicine", "alternative"),
    ("supply_info", "supplyInfo"),
    ("is_favorite", "isFavorite"),
    ("created_at", "createdAt"),
    ("updated_at", "updatedAt"),
    ("staff_name", "employeeName"),
    ("employee_id", "employeeId"),
    ("shift_type", "type"),
    ("start_time", "startTime"),
    ("end_time", "endTime"),
    ("employment_type", "employmentType"),
    ("hire_date", "hireDate"),
];

const TIME_FIELDS: &[&str] = &["start_time", "end_time"];
const BOOL_FIELDS: &[&str] = &["is_favorite"];

fn remote_name(local: &str) -> &str {
    FIELD_MAP
        .iter()
        .find(|(l, _)| *l == local)
        .map(|(_, r)| *r)
        .unwrap_or(local)
}

fn local_name(remote: &str) -> &str {
    FIELD_MAP
        .iter()
        .find(|(_, r)| *r == remote)
        .map(|(l, _)| *l)
        .unwrap_or(remote)
}

/// Translate a local record into spreadsheet column names.
pub fn to_remote(record: &Record) -> Record {
    record
        .iter()
        .map(|(key, value)| {
            let value = if TIME_FIELDS.contains(&key.as_str()) {
                normalize_time(value)
            } else {
                value.clone()
            };
            (remote_name(key).to_string(), value)
        })
        .collect()
}

/// Translate a spreadsheet row back into a local record, repairing values
/// the spreadsheet engine mangled.
pub fn from_remote(remote: &Record) -> Record {
    remote
        .iter()
        .map(|(key, value)| {
            let local = local_name(key);
            let value = if TIME_FIELDS.contains(&local) {
                normalize_time(value)
            } else if BOOL_FIELDS.contains(&local) {
                Value::Bool(normalize_bool(value))
            } else if local == "id" {
                normalize_id(value)
            } else {
                value.clone()
            };
            (local.to_string(), value)
        })
        .collect()
}

/// Reduce a time-of-day value to `HH:mm` text.
///
/// Handles ISO date-times (including the `1899-12-30T08:30:00.000Z` epoch
/// artifact) and numeric day fractions. Anything else is left alone.
pub fn normalize_time(value: &Value) -> Value {
    match value {
        Value::String(s) => match iso_time_component(s) {
            Some(hhmm) => Value::String(hhmm),
            None => value.clone(),
        },
        Value::Number(n) => match n.as_f64() {
            Some(fraction) if (0.0..1.0).contains(&fraction) => {
                let minutes = (fraction * 24.0 * 60.0).round() as u32 % (24 * 60);
                Value::String(format!("{:02}:{:02}", minutes / 60, minutes % 60))
            }
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// `HH:mm` out of a `YYYY-MM-DDTHH:mm...` string.
fn iso_time_component(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    if bytes.len() < 16 {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    let shape_ok = digits(0..4)
        && bytes[4] == b'-'
        && digits(5..7)
        && bytes[7] == b'-'
        && digits(8..10)
        && bytes[10] == b'T'
        && digits(11..13)
        && bytes[13] == b':'
        && digits(14..16);
    if shape_ok {
        Some(s[11..16].to_string())
    } else {
        None
    }
}

/// Spreadsheet booleans come back as `true`, `"TRUE"`, `"true"` or `1`.
pub fn normalize_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "TRUE",
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn normalize_id(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        other => other.clone(),
    }
}
