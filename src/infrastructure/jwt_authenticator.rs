use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::application::ports::auth_port::{Actor, Authenticator};
use crate::domain::errors::SyncResult;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// HS256-`Authenticator` backed by `jsonwebtoken`, the same token shape the
/// reference server's HTTP login issues (`sub` = user id, `exp` = unix
/// timestamp). Handshake tokens presented over the DocSync WebSocket are
/// expected to be the same bearer token the HTTP API already hands out.
pub struct JwtAuthenticator {
    secret: String,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> SyncResult<Option<Actor>> {
        let result = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        );
        match result {
            Ok(data) => Ok(Some(Actor {
                user_id: data.claims.sub,
                context: None,
            })),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn token_for(user_id: &str, secret: &str, exp: usize) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                sub: user_id.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn valid_token_resolves_actor() {
        let auth = JwtAuthenticator::new("test-secret");
        let token = token_for("user-1", "test-secret", usize::MAX / 2);
        let actor = auth.authenticate(&token).await.unwrap().unwrap();
        assert_eq!(actor.user_id, "user-1");
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let auth = JwtAuthenticator::new("test-secret");
        let token = token_for("user-1", "other-secret", usize::MAX / 2);
        assert!(auth.authenticate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let auth = JwtAuthenticator::new("test-secret");
        let token = token_for("user-1", "test-secret", 1);
        assert!(auth.authenticate(&token).await.unwrap().is_none());
    }
}
