use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentationError {
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// Whatever actually puts a notification in front of the user
///
/// Presenting an id that is still on screen replaces it rather than adding a
/// second entry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn present(
        &self,
        notification_id: i32,
        title: &str,
        body: &str,
    ) -> Result<(), PresentationError>;
}

/// A notification currently in the tray
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayEntry {
    pub title: String,
    pub body: String,
}

/// Terminal stand-in for the platform notification service
pub struct ConsolePresenter {
    enabled: bool,
    tray: Mutex<BTreeMap<i32, TrayEntry>>,
}

impl ConsolePresenter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            tray: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of notifications currently in the tray
    pub fn active_count(&self) -> usize {
        self.tray.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn active(&self, notification_id: i32) -> Option<TrayEntry> {
        self.tray
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&notification_id)
            .cloned()
    }
}

#[async_trait]
impl NotificationPresenter for ConsolePresenter {
    async fn present(
        &self,
        notification_id: i32,
        title: &str,
        body: &str,
    ) -> Result<(), PresentationError> {
        if !self.enabled {
            return Err(PresentationError::PermissionDenied);
        }

        let replaced = self
            .tray
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                notification_id,
                TrayEntry {
                    title: title.to_string(),
                    body: body.to_string(),
                },
            )
            .is_some();

        if replaced {
            debug!("Updated notification {}", notification_id);
        } else {
            println!("🔔 {}: {}", title, body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_id_collapses() {
        let presenter = ConsolePresenter::new(true);

        presenter.present(7, "Medication Alert", "first").await.unwrap();
        presenter.present(7, "Medication Alert", "second").await.unwrap();
        presenter.present(8, "Medication Alert", "other").await.unwrap();

        assert_eq!(presenter.active_count(), 2);
        assert_eq!(presenter.active(7).unwrap().body, "second");
    }

    #[tokio::test]
    async fn test_disabled_denies_permission() {
        let presenter = ConsolePresenter::new(false);

        let result = presenter.present(1, "t", "b").await;
        assert_eq!(result, Err(PresentationError::PermissionDenied));
        assert_eq!(presenter.active_count(), 0);
    }
}
