// Backend provider - serves the poller's notification fetch from the REST client
use async_trait::async_trait;
use medalert_api::{BackendClient, Notification};
use uuid::Uuid;

use crate::poller::NotificationSource;
use crate::Result;

#[async_trait]
impl NotificationSource for BackendClient {
    async fn latest_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        Ok(BackendClient::latest_notifications(self, user_id).await?)
    }
}
