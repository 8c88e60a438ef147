use super::EntityKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum ResourceStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error(String),
}

impl ResourceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceStatus::Idle => "idle",
            ResourceStatus::Loading => "loading",
            ResourceStatus::Success => "success",
            ResourceStatus::Error(_) => "error",
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ResourceStatus::Loading)
    }
}

/// Target of a status flag: one entity, or the whole collection for
/// list-level fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusScope {
    Entity(EntityKey),
    Collection,
}
