//! Record model shared by every storage layer.
//!
//! Records travel as dynamic JSON objects so fields the portal does not know
//! about survive a round trip through any backend. The typed structs below
//! are views for consumers that want named fields.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of one table, keyed by local (snake_case) field names.
pub type Record = Map<String, Value>;

/// The four tables the portal keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Medicines,
    Announcements,
    Shifts,
    Employees,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Announcements,
        Table::Shifts,
        Table::Medicines,
        Table::Employees,
    ];

    /// Table name as used by both remote backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Medicines => "medicines",
            Table::Announcements => "announcements",
            Table::Shifts => "shifts",
            Table::Employees => "employees",
        }
    }

    /// Fixed key of this table's entry in the durable mirror.
    pub fn mirror_key(&self) -> &'static str {
        match self {
            Table::Medicines => "pharmacy_medicines",
            Table::Announcements => "pharmacy_announcements",
            Table::Shifts => "pharmacy_shifts",
            Table::Employees => "pharmacy_employees",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Table {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "medicines" | "medicine" => Ok(Table::Medicines),
            "announcements" | "announcement" => Ok(Table::Announcements),
            "shifts" | "shift" => Ok(Table::Shifts),
            "employees" | "employee" => Ok(Table::Employees),
            _ => Err(anyhow::anyhow!("Unknown table: {}", s)),
        }
    }
}

/// Id of a record, if it has a usable one.
pub fn record_id(record: &Record) -> Option<&str> {
    match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Drop rows without an id; they are blank spreadsheet rows, not records.
pub fn retain_records(records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .filter(|r| record_id(r).is_some())
        .collect()
}

/// Current time in the ISO-8601 form every layer stores (`...T..:..:..sssZ`).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A fresh `updated_at` that sorts strictly after `previous`.
///
/// Two updates inside the same millisecond would otherwise share a stamp.
pub fn next_timestamp(previous: Option<&str>) -> String {
    let now = Utc::now();
    let prev = previous
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc));
    let stamp = match prev {
        Some(p) if now <= p => p + Duration::milliseconds(1),
        _ => now,
    };
    stamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Client-side id: `id_<epoch millis>_<9 base36 chars>`.
pub fn generate_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("id_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Deserialize a record into one of the typed views.
pub fn decode<T: DeserializeOwned>(record: &Record) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(record.clone()))
}

/// Serialize a typed view back into a record.
pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Distribution status of a medicine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SalesStatus {
    /// 販売中止
    Discontinued,
    /// 出荷調整中
    SupplyRestricted,
    /// 新規採用
    NewlyAdopted,
    /// その他
    #[default]
    Other,
}

impl SalesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesStatus::Discontinued => "販売中止",
            SalesStatus::SupplyRestricted => "出荷調整中",
            SalesStatus::NewlyAdopted => "新規採用",
            SalesStatus::Other => "その他",
        }
    }

    /// Statuses the dashboard flags for attention.
    pub fn needs_attention(&self) -> bool {
        matches!(self, SalesStatus::Discontinued | SalesStatus::SupplyRestricted)
    }
}

impl From<String> for SalesStatus {
    fn from(label: String) -> Self {
        match label.trim() {
            "販売中止" => SalesStatus::Discontinued,
            "出荷調整中" => SalesStatus::SupplyRestricted,
            "新規採用" => SalesStatus::NewlyAdopted,
            _ => SalesStatus::Other,
        }
    }
}

impl From<SalesStatus> for String {
    fn from(status: SalesStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for SalesStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Medicine {
    pub id: String,
    pub name: String,
    pub generic_name: String,
    pub category: String,
    pub sales_status: SalesStatus,
    pub discontinuation_date: String,
    pub alternative_medicine: String,
    pub supply_info: String,
    pub notes: String,
    pub is_favorite: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub content: String,
    pub priority: String,
    pub date: String,
    pub category: String,
    pub author: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shift {
    pub id: String,
    pub staff_name: String,
    pub date: String,
    pub shift_type: String,
    /// `HH:mm`
    pub start_time: String,
    /// `HH:mm`
    pub end_time: String,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub furigana: String,
    pub position: String,
    pub employment_type: String,
    pub phone: String,
    pub email: String,
    pub hire_date: String,
    pub status: String,
    pub qualification: String,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_from_str_and_display() {
        assert_eq!("medicines".parse::<Table>().unwrap(), Table::Medicines);
        assert_eq!("Shift".parse::<Table>().unwrap(), Table::Shifts);
        assert!("patients".parse::<Table>().is_err());
        assert_eq!(Table::Employees.to_string(), "employees");
        assert_eq!(Table::Announcements.mirror_key(), "pharmacy_announcements");
    }

    #[test]
    fn test_record_id_rejects_empty() {
        let with_id = json!({"id": "id_1"}).as_object().unwrap().clone();
        let empty = json!({"id": ""}).as_object().unwrap().clone();
        let missing = json!({"name": "x"}).as_object().unwrap().clone();

        assert_eq!(record_id(&with_id), Some("id_1"));
        assert_eq!(record_id(&empty), None);
        assert_eq!(record_id(&missing), None);
        assert_eq!(retain_records(vec![with_id, empty, missing]).len(), 1);
    }

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "id");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(generate_id(), id);
    }

    #[test]
    fn test_next_timestamp_strictly_increases() {
        let far_future = "2999-01-01T00:00:00.000Z";
        let next = next_timestamp(Some(far_future));
        assert_eq!(next, "2999-01-01T00:00:00.001Z");

        let stamp = next_timestamp(Some("2000-01-01T00:00:00.000Z"));
        assert!(stamp.as_str() > "2000-01-01T00:00:00.000Z");
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn test_sales_status_labels() {
        assert_eq!(SalesStatus::from("販売中止".to_string()), SalesStatus::Discontinued);
        assert_eq!(SalesStatus::from("出荷調整中".to_string()), SalesStatus::SupplyRestricted);
        assert_eq!(SalesStatus::from("".to_string()), SalesStatus::Other);
        assert!(SalesStatus::SupplyRestricted.needs_attention());
        assert!(!SalesStatus::NewlyAdopted.needs_attention());
    }

    #[test]
    fn test_decode_medicine_with_missing_fields() {
        let record = json!({
            "id": "id_1",
            "name": "ガスモチン錠5mg",
            "sales_status": "販売中止",
            "is_favorite": true,
            "extra_field": "kept elsewhere"
        })
        .as_object()
        .unwrap()
        .clone();

        let med: Medicine = decode(&record).unwrap();
        assert_eq!(med.name, "ガスモチン錠5mg");
        assert_eq!(med.sales_status, SalesStatus::Discontinued);
        assert!(med.is_favorite);
        assert_eq!(med.generic_name, "");

        let back = encode(&med).unwrap();
        assert_eq!(back["sales_status"], json!("販売中止"));
        assert!(!back.contains_key("extra_field"));
    }
}
