// Incoming push messages and push-token refreshes
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use medalert_api::{BackendClient, TokenRegisterRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::poller::DEFAULT_TITLE;
use crate::presenter::NotificationPresenter;

/// The visible part of a push message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// A push as delivered by the messaging service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub notification: Option<PushNotification>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

pub struct PushHandler {
    api: BackendClient,
    presenter: Arc<dyn NotificationPresenter>,
    next_id: AtomicI32,
}

impl PushHandler {
    pub fn new(api: BackendClient, presenter: Arc<dyn NotificationPresenter>) -> Self {
        // Seeded from the clock so ids don't collide with the previous run's
        let seed = chrono::Utc::now().timestamp_millis() as i32;
        Self {
            api,
            presenter,
            next_id: AtomicI32::new(seed),
        }
    }

    /// Show whatever a push carries; returns how many notifications went up
    ///
    /// A notification block and a data payload are each shown, with
    /// "Medication Alert" standing in for a missing title.
    pub async fn on_message_received(&self, message: &PushMessage) -> usize {
        let mut shown = 0;

        if let Some(notification) = &message.notification {
            let title = notification.title.as_deref().unwrap_or(DEFAULT_TITLE);
            let body = notification.body.as_deref().unwrap_or("");
            if self.show(title, body).await {
                shown += 1;
            }
        }

        if !message.data.is_empty() {
            let title = message.data.get("title").map(String::as_str).unwrap_or(DEFAULT_TITLE);
            let body = message.data.get("message").map(String::as_str).unwrap_or("");
            if self.show(title, body).await {
                shown += 1;
            }
        }

        shown
    }

    async fn show(&self, title: &str, body: &str) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.presenter.present(id, title, body).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not show push notification: {}", e);
                false
            }
        }
    }

    /// Register a refreshed push token for whoever is logged in
    ///
    /// Failures are logged and swallowed; the next refresh or login tries again.
    pub async fn on_new_token(&self, token: &str) -> bool {
        debug!("Push token refreshed");

        let me = match self.api.me().await {
            Ok(me) => me,
            Err(e) => {
                warn!("Skipping push token registration, no session: {}", e);
                return false;
            }
        };

        let request = TokenRegisterRequest {
            user_id: me.user_id,
            token: token.to_string(),
        };
        match self.api.register_token(&request).await {
            Ok(_) => {
                info!("Push token registered for {}", me.user_id);
                true
            }
            Err(e) => {
                warn!("Failed to register push token: {}", e);
                false
            }
        }
    }
}
