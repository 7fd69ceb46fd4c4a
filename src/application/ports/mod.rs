pub mod auth_port;
pub mod client_provider;
pub mod request_channel;
pub mod server_provider;

pub use auth_port::{Actor, Authenticator, Authorizer, Capability};
pub use client_provider::{ClientProvider, ClientTx, DocEntry, TxMode};
pub use request_channel::{ChannelEvent, RequestChannel, DEFAULT_REQUEST_TIMEOUT};
pub use server_provider::{ServerProvider, ServerSyncRequest, ServerSyncResponse};
