/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identity of a tenant. Opaque to everything below the authentication layer.
pub type UserId = String;

/// Backend-assigned worker identity (container id).
pub type WorkerId = String;

/// Worker-assigned script execution identity.
pub type ScriptId = String;

/// Generate a fresh, time-ordered identifier.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
