pub mod dispatch;
pub mod rooms;
pub mod wire;
pub mod ws;

pub use dispatch::{Dispatcher, HandshakeOutcome};
pub use rooms::{ConnectionId, RoomMember, Rooms};
pub use wire::{WireError, WireMessage, WireResult};
