use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Autosaved wizard progress, stored under a fixed key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    pub form_data: Value,
    pub sections: Value,
    pub current_step: usize,
    pub timestamp: DateTime<Utc>,
}

impl DraftSnapshot {
    pub fn new(form_data: Value, sections: Value, current_step: usize) -> Self {
        Self {
            form_data,
            sections,
            current_step,
            timestamp: Utc::now(),
        }
    }

    /// Equal content regardless of when it was taken.
    pub fn same_content(&self, other: &DraftSnapshot) -> bool {
        self.form_data == other.form_data
            && self.sections == other.sections
            && self.current_step == other.current_step
    }
}
