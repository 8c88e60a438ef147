pub mod draft_store;
pub mod remote_api;

pub use draft_store::DraftStore;
pub use remote_api::{ApiAck, RemoteApi};
