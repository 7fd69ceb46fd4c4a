use async_trait::async_trait;

use crate::application::ports::auth_port::{Actor, Authorizer, Capability};
use crate::domain::errors::SyncResult;
use crate::domain::ids::DocId;

/// `Authorizer` that grants every authenticated actor full `Edit` capability
/// on every document. DocSync's core deliberately has no notion of document
/// ownership or sharing (see DESIGN.md) — a real deployment composes the
/// dispatcher with an `Authorizer` backed by its own access-control store
/// instead of this one; this adapter is what a single-tenant or
/// already-access-checked-upstream deployment wires in directly.
pub struct AllowAuthenticatedAuthorizer;

#[async_trait]
impl Authorizer for AllowAuthenticatedAuthorizer {
    async fn authorize(&self, _doc_id: &DocId, _actor: &Actor) -> SyncResult<Capability> {
        Ok(Capability::Edit)
    }
}
