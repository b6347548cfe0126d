//! Operator identity.

use async_trait::async_trait;

/// Maps a presented credential to an operator name.
#[async_trait]
pub trait OperatorAuthenticator: Send + Sync {
    /// Operator for `token`, or `None` if it is missing or unknown.
    async fn authenticate(&self, token: Option<&str>) -> Option<String>;
}
