use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const TEMP_PREFIX: &str = "temp:";

/// Identity of an entity in the store: the server id once persisted, or a
/// client generated placeholder before the create is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Server(i64),
    Temp(Uuid),
}

impl EntityKey {
    pub fn new_temp() -> Self {
        EntityKey::Temp(Uuid::new_v4())
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, EntityKey::Temp(_))
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            EntityKey::Server(id) => Some(*id),
            EntityKey::Temp(_) => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Server(id) => write!(f, "{id}"),
            EntityKey::Temp(uuid) => write!(f, "{TEMP_PREFIX}{uuid}"),
        }
    }
}

impl FromStr for EntityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(rest) = trimmed.strip_prefix(TEMP_PREFIX) {
            return Uuid::parse_str(rest)
                .map(EntityKey::Temp)
                .map_err(|e| format!("Invalid temp id {trimmed}: {e}"));
        }
        trimmed
            .parse::<i64>()
            .map(EntityKey::Server)
            .map_err(|_| format!("Invalid entity id: {trimmed}"))
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        EntityKey::Server(value)
    }
}
