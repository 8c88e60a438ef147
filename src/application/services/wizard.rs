use super::coordinator::ResourceCoordinator;
use crate::application::ports::DraftStore;
use crate::domain::entities::{
    DraftSnapshot, Entity, FieldError, StepValidation, WizardDraft, WizardStep,
};
use crate::domain::value_objects::{CollectionName, EntityKey};
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    Step(usize),
    /// Terminal. Carries the key the submitted entity was stored under.
    Submitted(EntityKey),
}

/// Drives a validation-gated sequence of steps over one draft. The draft is
/// owned here until a successful submit hands the entity to the store.
pub struct WizardController<D: WizardDraft> {
    draft: D,
    steps: Vec<WizardStep<D>>,
    state: WizardState,
    last_error: Option<String>,
}

impl<D: WizardDraft> WizardController<D> {
    pub fn new(draft: D) -> Self {
        Self {
            draft,
            steps: D::steps(),
            state: WizardState::Step(0),
            last_error: None,
        }
    }

    pub fn draft(&self) -> &D {
        &self.draft
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn current_step(&self) -> usize {
        match self.state {
            WizardState::Step(step) => step,
            WizardState::Submitted(_) => self.last_step(),
        }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step_name(&self, step: usize) -> Option<&'static str> {
        self.steps.get(step).map(|s| s.name)
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.state, WizardState::Submitted(_))
    }

    /// Error of the last failed submit, cleared by the next attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn last_step(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn update_draft<F>(&mut self, edit: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut D),
    {
        if self.is_submitted() {
            return Err(AppError::InvalidInput(
                "The wizard has already been submitted".to_string(),
            ));
        }
        edit(&mut self.draft);
        Ok(())
    }

    /// Always evaluated against the current draft.
    pub fn validate(&self, step: usize) -> StepValidation {
        match self.steps.get(step) {
            Some(definition) => StepValidation::from_errors((definition.validate)(&self.draft)),
            None => StepValidation::from_errors(vec![FieldError::new(
                "step",
                format!("Unknown step {step}"),
            )]),
        }
    }

    /// First invalid step before `step`, with its errors.
    fn first_invalid_before(&self, step: usize) -> Option<(usize, StepValidation)> {
        (0..step.min(self.steps.len()))
            .map(|index| (index, self.validate(index)))
            .find(|(_, validation)| !validation.valid)
    }

    /// Moves to `step` if every earlier step is valid. Leaves the state
    /// untouched otherwise.
    pub fn go_to(&mut self, step: usize) -> bool {
        if self.is_submitted() || step >= self.steps.len() {
            return false;
        }
        if let Some((invalid, validation)) = self.first_invalid_before(step) {
            tracing::debug!(
                target: "sync::wizard",
                requested = step,
                invalid_step = invalid,
                errors = ?validation.messages(),
                "navigation blocked"
            );
            return false;
        }
        self.state = WizardState::Step(step);
        true
    }

    pub fn next(&mut self) -> bool {
        self.go_to(self.current_step() + 1)
    }

    pub fn back(&mut self) -> bool {
        match self.current_step().checked_sub(1) {
            Some(step) => self.go_to(step),
            None => false,
        }
    }

    pub fn snapshot(&self) -> Result<DraftSnapshot, AppError> {
        let (form_data, sections) = self.draft.to_snapshot_parts()?;
        Ok(DraftSnapshot::new(form_data, sections, self.current_step()))
    }

    /// Resumes from an autosaved snapshot. The saved step is lowered to the
    /// furthest step the restored draft may legally be on.
    pub async fn restore(store: &dyn DraftStore, key: &str) -> Result<Option<Self>, AppError> {
        let Some(snapshot) = store.load(key).await? else {
            return Ok(None);
        };
        let draft = D::from_snapshot_parts(snapshot.form_data, snapshot.sections)?;
        let mut controller = Self::new(draft);

        let saved = snapshot.current_step.min(controller.last_step());
        let step = controller
            .first_invalid_before(saved)
            .map_or(saved, |(invalid, _)| invalid);
        controller.state = WizardState::Step(step);

        tracing::info!(
            target: "sync::wizard",
            key,
            saved_step = snapshot.current_step,
            step,
            "restored draft"
        );
        Ok(Some(controller))
    }

    /// Submits the draft as a create. Only allowed from the last step with
    /// every step valid. On failure the wizard stays on the last step and can
    /// be submitted again.
    pub async fn submit(&mut self, coordinator: &ResourceCoordinator) -> Result<Entity, AppError> {
        if self.is_submitted() {
            return Err(AppError::InvalidInput(
                "The wizard has already been submitted".to_string(),
            ));
        }
        if self.current_step() != self.last_step() {
            return Err(AppError::InvalidInput(
                "Submit is only available on the last step".to_string(),
            ));
        }
        if let Some((_, validation)) = self.first_invalid_before(self.steps.len()) {
            let message = validation.messages().join(", ");
            self.last_error = Some(message.clone());
            return Err(AppError::ValidationError(message));
        }

        self.last_error = None;
        let collection =
            CollectionName::new(D::collection_name()).map_err(AppError::ConfigurationError)?;
        let fields = self.draft.to_fields()?;
        let handle = coordinator.create(&collection, fields, self.draft.attachments());

        match handle.outcome().await {
            Ok(key) => {
                let entity = coordinator
                    .store()
                    .get(&collection, &key)
                    .ok_or_else(|| AppError::NotFound(format!("{collection} {key}")))?;
                self.state = WizardState::Submitted(key);
                tracing::info!(
                    target: "sync::wizard",
                    collection = %collection,
                    key = %key,
                    "wizard submitted"
                );
                Ok(entity)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                tracing::warn!(
                    target: "sync::wizard",
                    collection = %collection,
                    error = %err,
                    "wizard submit failed"
                );
                Err(err.into())
            }
        }
    }

    /// `submit` followed by pruning the autosaved snapshot.
    pub async fn submit_and_prune(
        &mut self,
        coordinator: &ResourceCoordinator,
        drafts: &dyn DraftStore,
        key: &str,
    ) -> Result<Entity, AppError> {
        let entity = self.submit(coordinator).await?;
        if let Err(err) = drafts.clear(key).await {
            tracing::warn!(
                target: "sync::wizard",
                key,
                error = %err,
                "failed to prune autosaved draft"
            );
        }
        Ok(entity)
    }
}

/// Periodically snapshots a wizard into a `DraftStore` while it is not
/// submitted. Identical snapshots are written once.
pub struct WizardAutosave;

impl WizardAutosave {
    pub fn spawn<D: WizardDraft>(
        controller: Arc<Mutex<WizardController<D>>>,
        drafts: Arc<dyn DraftStore>,
        key: impl Into<String>,
        interval: Duration,
    ) -> AutosaveHandle {
        let key = key.into();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_saved: Option<DraftSnapshot> = None;

            loop {
                ticker.tick().await;

                // a submit in progress holds the lock; try again next tick
                let snapshot = {
                    let Ok(wizard) = controller.try_lock() else {
                        continue;
                    };
                    if wizard.is_submitted() {
                        break;
                    }
                    wizard.snapshot()
                };

                let snapshot = match snapshot {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        tracing::warn!(target: "sync::autosave", key = %key, error = %err, "snapshot failed");
                        continue;
                    }
                };
                if last_saved
                    .as_ref()
                    .is_some_and(|previous| previous.same_content(&snapshot))
                {
                    continue;
                }

                match drafts.save(&key, &snapshot).await {
                    Ok(()) => {
                        tracing::debug!(
                            target: "sync::autosave",
                            key = %key,
                            step = snapshot.current_step,
                            "draft autosaved"
                        );
                        last_saved = Some(snapshot);
                    }
                    Err(err) => {
                        tracing::warn!(target: "sync::autosave", key = %key, error = %err, "autosave failed");
                    }
                }
            }
            tracing::debug!(target: "sync::autosave", key = %key, "autosave stopped");
        });
        AutosaveHandle { task }
    }
}

/// Stops the autosave task when stopped or dropped.
#[derive(Debug)]
pub struct AutosaveHandle {
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    /// Cancels the task and waits for it to wind down. Once this returns no
    /// save started by the task can still complete.
    pub async fn stop(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
