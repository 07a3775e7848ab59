//! ACL collaborator boundary.
//!
//! Resolves the identifier sets a user (plus their groups) can read data
//! for. The engine queries the four sets concurrently on a context-cache
//! miss and caches the assembled scope, so implementations see at most one
//! round of calls per user per TTL window.

use crate::model::{ProgramId, UserId};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait AclStore: Send + Sync {
    async fn accessible_entity_types(&self, user: &UserId, groups: &[String])
        -> Result<Vec<String>>;

    async fn accessible_programs(&self, user: &UserId, groups: &[String])
        -> Result<Vec<ProgramId>>;

    async fn accessible_program_stages(
        &self,
        user: &UserId,
        groups: &[String],
    ) -> Result<Vec<String>>;

    async fn accessible_relationship_types(
        &self,
        user: &UserId,
        groups: &[String],
    ) -> Result<Vec<String>>;
}
