//! Authorization is an external collaborator this crate only defines the seam for
//! (the hub decides who may read a dataset); the engine itself carries no auth logic.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny,
    Unauthenticated,
}

/// Pluggable authorization check, given the target dataset and an optional bearer token.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, dataset: &str, token: Option<&str>) -> AuthDecision;
}

/// Default authorizer for tests and local runs: every read is allowed.
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn authorize(&self, _dataset: &str, _token: Option<&str>) -> AuthDecision {
        AuthDecision::Allow
    }
}
