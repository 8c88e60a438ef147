pub mod coordinator;
pub mod mutation_journal;
pub mod mutation_queue;
pub mod optimistic;
pub mod resource_store;
pub mod selection;
pub mod wizard;

pub use coordinator::{MutationHandle, ResourceCoordinator};
pub use mutation_journal::MutationJournal;
pub use mutation_queue::{MutationQueue, MutationTicket};
pub use optimistic::PatchApplier;
pub use resource_store::ResourceStore;
pub use selection::SelectionSet;
pub use wizard::{AutosaveHandle, WizardAutosave, WizardController, WizardState};
