pub mod access_token;
pub mod collection_name;
pub mod entity_key;
pub mod mutation;
pub mod page_request;
pub mod resource_status;

pub use access_token::AccessToken;
pub use collection_name::CollectionName;
pub use entity_key::EntityKey;
pub use mutation::{MutationId, MutationKind, MutationPolicy, MutationStatus};
pub use page_request::PageRequest;
pub use resource_status::{ResourceStatus, StatusScope};
