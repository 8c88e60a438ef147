use crate::domain::value_objects::EntityKey;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const VERSION_TIMESTAMP_FIELDS: [&str; 3] = ["updatedDate", "updatedAt", "createdDate"];

/// A cached domain record (course, section, badge, user, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    pub version: i64,
    pub fields: Map<String, Value>,
    /// Temp key this entity replaces; the store renames the entry on upsert.
    #[serde(skip)]
    pub origin: Option<EntityKey>,
}

impl Entity {
    pub fn new(key: EntityKey, fields: Map<String, Value>) -> Self {
        Self {
            key,
            version: 0,
            fields,
            origin: None,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn replacing(mut self, origin: EntityKey) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn merge_fields(&mut self, patch: &Map<String, Value>) {
        for (name, value) in patch {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Wire representation: the domain fields plus `id` once the key is a
    /// server id.
    pub fn to_json(&self) -> Value {
        let mut map = self.fields.clone();
        if let Some(id) = self.key.server_id() {
            map.insert("id".to_string(), Value::from(id));
        }
        Value::Object(map)
    }

    /// Parses an API payload. Anything that is not an object carrying a
    /// numeric `id` is rejected.
    pub fn from_json(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("Entity payload must be a JSON object".to_string());
        };

        let id = match map.remove("id") {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| format!("Entity id is not an integer: {n}"))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("Entity id is not numeric: {s}"))?,
            Some(other) => return Err(format!("Entity id has unexpected type: {other}")),
            None => return Err("Entity payload is missing an id".to_string()),
        };

        let version = extract_version(&map);
        Ok(Self::new(EntityKey::Server(id), map).with_version(version))
    }
}

fn extract_version(map: &Map<String, Value>) -> i64 {
    if let Some(version) = map.get("version").and_then(Value::as_i64) {
        return version;
    }
    VERSION_TIMESTAMP_FIELDS
        .iter()
        .filter_map(|field| map.get(*field).and_then(Value::as_str))
        .find_map(parse_timestamp_millis)
        .unwrap_or(0)
}

fn parse_timestamp_millis(raw: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    // the admin API frequently omits the offset
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}
