pub mod doc_binding;
pub mod errors;
pub mod ids;
pub mod ops;
pub mod presence;

pub use doc_binding::DocBinding;
pub use errors::SyncError;
pub use ids::{Clock, ClientId, DeviceId, DocId};
pub use ops::OpBatch;
pub use presence::{Patch, Presence};
