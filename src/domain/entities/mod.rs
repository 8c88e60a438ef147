pub mod course_draft;
pub mod draft_snapshot;
pub mod entity;
pub mod mutation_record;
pub mod page;
pub mod patch;
pub mod request_body;
pub mod wizard_draft;

pub use course_draft::{CourseBasicInfo, CourseDraft, CoursePublishSettings, CourseSection};
pub use draft_snapshot::DraftSnapshot;
pub use entity::Entity;
pub use mutation_record::MutationRecord;
pub use page::Page;
pub use patch::{EntityCollection, InversePatch, Patch, PatchOp};
pub use request_body::{FilePart, MultipartForm, RequestBody};
pub use wizard_draft::{FieldError, StepValidation, WizardDraft, WizardStep};
