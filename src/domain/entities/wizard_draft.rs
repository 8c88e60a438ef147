use super::FilePart;
use crate::shared::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A field-level validation failure, shown inline next to the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepValidation {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl StepValidation {
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }
}

pub struct WizardStep<D> {
    pub name: &'static str,
    pub validate: fn(&D) -> Vec<FieldError>,
}

/// The entity being assembled by a multi-step wizard.
pub trait WizardDraft: Clone + Send + Sync + 'static {
    fn steps() -> Vec<WizardStep<Self>>;

    /// Collection the submitted entity lands in.
    fn collection_name() -> &'static str;

    fn to_fields(&self) -> Result<Map<String, Value>, AppError>;

    fn attachments(&self) -> Vec<FilePart> {
        Vec::new()
    }

    /// Splits the draft into the `formData` and `sections` parts of a snapshot.
    fn to_snapshot_parts(&self) -> Result<(Value, Value), AppError>;

    fn from_snapshot_parts(form_data: Value, sections: Value) -> Result<Self, AppError>;
}
