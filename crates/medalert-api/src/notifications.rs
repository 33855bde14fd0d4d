use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification raised by the backend for one of the user's devices
///
/// Read-only on our side; the backend decides ordering and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub device_id: String,
    pub user_id: Uuid,
    /// Timestamp exactly as the backend sent it
    pub created_at: String,
}
