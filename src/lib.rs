// Module layout:
// - domain: core value types and capability traits (DocBinding, errors, ids, presence)
// - application::ports: traits the core depends on but does not implement
// - application::services: the client-side engine (DocStore, PushEngine, SyncClient, ...)
// - server: the realtime dispatch server (rooms, authorization, fan-out)
// - infrastructure: concrete adapters (sqlx providers, websocket transport)
// - bootstrap: configuration and process wiring
// - testing: in-memory fakes and a reference DocBinding, used by the test suite only

pub mod application;
pub mod bootstrap;
pub mod domain;
pub mod infrastructure;
pub mod server;

pub mod testing;
