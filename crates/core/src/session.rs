use serde::{Deserialize, Serialize};

use crate::types::new_id;

/// An authenticated, time-bounded grant for one tenant.
///
/// The credential is whatever the authentication provider hands over
/// (e.g. a holder-of-key token). It is only passed through, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_name: String,
    pub session_id: String,
    #[serde(default)]
    pub credential: Option<String>,
}

impl Session {
    /// Create a session with a freshly generated id.
    pub fn new(user_name: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            user_name: user_name.into(),
            session_id: new_id(),
            credential,
        }
    }
}
