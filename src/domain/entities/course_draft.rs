use super::{FieldError, FilePart, WizardDraft, WizardStep};
use crate::shared::error::AppError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STEP_BASIC_INFO: usize = 0;
pub const STEP_CONTENT: usize = 1;
pub const STEP_PUBLISH: usize = 2;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseBasicInfo {
    pub name: String,
    pub description: String,
    pub category_id: Option<i64>,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSection {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub content_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePublishSettings {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub target_group_ids: Vec<i64>,
    pub certificate_id: Option<i64>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseFormData {
    basic_info: CourseBasicInfo,
    publish: CoursePublishSettings,
}

/// Draft of the course-creation wizard: basic info, content, publish.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CourseDraft {
    pub basic_info: CourseBasicInfo,
    pub sections: Vec<CourseSection>,
    pub publish: CoursePublishSettings,
    /// Never autosaved; the user re-attaches it after a restore.
    pub cover_image: Option<FilePart>,
}

impl CourseDraft {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_basic_info(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.basic_info.name.trim().is_empty() {
            errors.push(FieldError::new("name", "Course name is required"));
        }
        if self.basic_info.description.trim().is_empty() {
            errors.push(FieldError::new(
                "description",
                "Course description is required",
            ));
        }
        if self.basic_info.category_id.is_none() {
            errors.push(FieldError::new("categoryId", "Category is required"));
        }
        errors
    }

    fn validate_content(&self) -> Vec<FieldError> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.title.trim().is_empty())
            .map(|(index, _)| {
                FieldError::new(
                    format!("sections[{index}].title"),
                    "Section title is required",
                )
            })
            .collect()
    }

    fn validate_publish(&self) -> Vec<FieldError> {
        match (self.publish.start_date, self.publish.end_date) {
            (Some(start), Some(end)) if end <= start => vec![FieldError::new(
                "endDate",
                "End date must be after start date",
            )],
            _ => Vec::new(),
        }
    }
}

impl WizardDraft for CourseDraft {
    fn steps() -> Vec<WizardStep<Self>> {
        vec![
            WizardStep {
                name: "basic_info",
                validate: CourseDraft::validate_basic_info,
            },
            WizardStep {
                name: "content",
                validate: CourseDraft::validate_content,
            },
            WizardStep {
                name: "publish",
                validate: CourseDraft::validate_publish,
            },
        ]
    }

    fn collection_name() -> &'static str {
        "course"
    }

    fn to_fields(&self) -> Result<Map<String, Value>, AppError> {
        let mut fields = match serde_json::to_value(&self.basic_info)? {
            Value::Object(map) => map,
            _ => return Err(AppError::Internal("Course info is not an object".into())),
        };
        if let Value::Object(publish) = serde_json::to_value(&self.publish)? {
            fields.extend(publish);
        }
        fields.insert("sections".to_string(), serde_json::to_value(&self.sections)?);
        Ok(fields)
    }

    fn attachments(&self) -> Vec<FilePart> {
        self.cover_image.iter().cloned().collect()
    }

    fn to_snapshot_parts(&self) -> Result<(Value, Value), AppError> {
        let form_data = serde_json::to_value(CourseFormData {
            basic_info: self.basic_info.clone(),
            publish: self.publish.clone(),
        })?;
        let sections = serde_json::to_value(&self.sections)?;
        Ok((form_data, sections))
    }

    fn from_snapshot_parts(form_data: Value, sections: Value) -> Result<Self, AppError> {
        let form: CourseFormData = serde_json::from_value(form_data)?;
        let sections: Vec<CourseSection> = if sections.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(sections)?
        };
        Ok(Self {
            basic_info: form.basic_info,
            sections,
            publish: form.publish,
            cover_image: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> CourseDraft {
        let mut draft = CourseDraft::new();
        draft.basic_info.name = "Rust for admins".to_string();
        draft.basic_info.description = "Ownership without tears".to_string();
        draft.basic_info.category_id = Some(4);
        draft
    }

    #[test]
    fn empty_draft_reports_required_fields() {
        let errors = CourseDraft::new().validate_basic_info();
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Course name is required",
                "Course description is required",
                "Category is required",
            ]
        );
    }

    #[test]
    fn content_step_accepts_no_sections_but_not_blank_titles() {
        let mut draft = filled();
        assert!(draft.validate_content().is_empty());

        draft.sections.push(CourseSection {
            title: "  ".to_string(),
            ..Default::default()
        });
        let errors = draft.validate_content();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sections[0].title");
    }

    #[test]
    fn publish_dates_must_be_ordered() {
        let mut draft = filled();
        draft.publish.start_date = NaiveDate::from_ymd_opt(2024, 5, 2);
        draft.publish.end_date = NaiveDate::from_ymd_opt(2024, 5, 1);
        assert_eq!(draft.validate_publish().len(), 1);

        draft.publish.end_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert!(draft.validate_publish().is_empty());
    }

    #[test]
    fn snapshot_parts_restore_the_draft_without_the_image() {
        let mut draft = filled();
        draft.sections.push(CourseSection {
            title: "Getting started".to_string(),
            description: None,
            content_ids: vec![11, 12],
        });
        draft.cover_image = Some(FilePart {
            field: "coverImage".to_string(),
            file_name: "cover.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        });

        let (form_data, sections) = draft.to_snapshot_parts().unwrap();
        let restored = CourseDraft::from_snapshot_parts(form_data, sections).unwrap();

        assert_eq!(restored.basic_info, draft.basic_info);
        assert_eq!(restored.sections, draft.sections);
        assert!(restored.cover_image.is_none());
    }

    #[test]
    fn fields_flatten_basic_info_and_publish() {
        let fields = filled().to_fields().unwrap();
        assert_eq!(fields["name"], Value::from("Rust for admins"));
        assert_eq!(fields["categoryId"], Value::from(4));
        assert!(fields.contains_key("isPublished"));
        assert!(fields.contains_key("sections"));
    }
}
