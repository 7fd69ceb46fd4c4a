pub mod allow_authenticated_authorizer;
pub mod jwt_authenticator;
pub mod postgres_provider;
pub mod sqlite_provider;
pub mod ws_channel;

pub use allow_authenticated_authorizer::AllowAuthenticatedAuthorizer;
pub use jwt_authenticator::JwtAuthenticator;
pub use postgres_provider::PostgresServerProvider;
pub use sqlite_provider::SqliteClientProvider;
pub use ws_channel::WsRequestChannel;
