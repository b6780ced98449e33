//! Token service used to turn a session credential into a bearer token a
//! worker can present to a VC.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Token service error: {0}")]
pub struct StsError(pub String);

#[async_trait]
pub trait StsClient: Send + Sync {
    /// Exchange the opaque session `credential` for a bearer token.
    async fn issue_bearer_token(&self, credential: &str) -> Result<String, StsError>;
}
