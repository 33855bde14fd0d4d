// Logged-in user state and the dashboard resources hanging off it
use std::sync::{Arc, Mutex};

use medalert_api::{
    AdherenceSummary, BackendClient, DeviceOut, LoginRequest, MedlogOut, RegisterRequest,
    RegisterResponse, ScheduleOut, ScheduleRequest, ScheduleUpdate, TokenRegisterRequest, UserOut,
    UserUpdate,
};
use medalert_store::SeenStore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credentials::{CredentialStore, DEFAULT_TOKEN_VALIDITY_DAYS};
use crate::{Error, Result};

/// Device id used for new schedules when the user has no paired dispenser
pub const DEFAULT_DEVICE_ID: &str = "DEFAULT_CHIP";

/// Who we're acting for; passed explicitly into every user-scoped call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Uuid,
}

/// Snapshot of everything the dashboard shows
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    pub profile: Option<UserOut>,
    pub adherence: Option<AdherenceSummary>,
    pub devices: Vec<DeviceOut>,
    pub schedules: Vec<ScheduleOut>,
    pub medlogs: Vec<MedlogOut>,
}

impl Dashboard {
    pub fn device_id(&self) -> &str {
        default_device_id(&self.devices)
    }
}

/// Chip id of the first device, or [`DEFAULT_DEVICE_ID`]
pub fn default_device_id(devices: &[DeviceOut]) -> &str {
    devices
        .first()
        .map(|d| d.chip_id.as_str())
        .unwrap_or(DEFAULT_DEVICE_ID)
}

/// Authentication plus user-scoped CRUD over the backend
pub struct Session {
    api: BackendClient,
    credentials: Mutex<CredentialStore>,
    host: String,
    seen: Option<Arc<SeenStore>>,
}

impl Session {
    pub fn new(api: BackendClient, credentials: CredentialStore) -> Self {
        let host = api
            .base_url()
            .host_str()
            .map(str::to_string)
            .unwrap_or_else(|| api.base_url().to_string());

        Self {
            api,
            credentials: Mutex::new(credentials),
            host,
            seen: None,
        }
    }

    /// Forget which notifications were shown whenever the user logs out
    pub fn with_seen_store(mut self, seen: Arc<SeenStore>) -> Self {
        self.seen = Some(seen);
        self
    }

    pub fn api(&self) -> &BackendClient {
        &self.api
    }

    fn credentials(&self) -> std::sync::MutexGuard<'_, CredentialStore> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pick up a stored login, if the backend still accepts it
    pub async fn restore(&self) -> Result<Option<SessionContext>> {
        let Some(token) = self.credentials().get_token(&self.host) else {
            debug!("No stored token for {}", self.host);
            return Ok(None);
        };
        self.api.set_token(Some(token));

        match self.api.me().await {
            Ok(me) => Ok(Some(SessionContext { user_id: me.user_id })),
            Err(e) if e.is_unauthorized() => {
                info!("Stored session for {} expired", self.host);
                self.forget_token()?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionContext> {
        let response = self
            .api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        self.api.set_token(Some(response.access_token.clone()));
        {
            let mut credentials = self.credentials();
            credentials.set_token(&self.host, &response.access_token, DEFAULT_TOKEN_VALIDITY_DAYS);
            credentials.save()?;
        }

        let me = self.api.me().await?;
        info!("Logged in as {}", me.user_id);
        Ok(SessionContext { user_id: me.user_id })
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        Ok(self.api.register(request).await?)
    }

    pub fn logout(&self) -> Result<()> {
        self.forget_token()?;
        if let Some(seen) = &self.seen {
            seen.clear()?;
        }
        info!("Logged out of {}", self.host);
        Ok(())
    }

    fn forget_token(&self) -> Result<()> {
        self.api.set_token(None);
        let mut credentials = self.credentials();
        if credentials.remove_token(&self.host) {
            credentials.save()?;
        }
        Ok(())
    }

    /// Fetch every dashboard resource concurrently
    ///
    /// The fetches are independent; one failing leaves its slot empty and
    /// doesn't hold up the others.
    pub async fn refresh_dashboard(&self, ctx: &SessionContext) -> Dashboard {
        let user_id = ctx.user_id;
        let (profile, adherence, device, schedules, medlogs) = futures::join!(
            self.api.get_user(user_id),
            self.api.adherence_summary(user_id),
            self.api.device_for_user(user_id),
            self.api.schedules(user_id),
            self.api.medlogs(user_id),
        );

        Dashboard {
            profile: profile
                .map_err(|e| warn!("Failed to load profile: {}", e))
                .ok(),
            adherence: adherence
                .map_err(|e| warn!("Failed to load adherence summary: {}", e))
                .ok(),
            devices: device
                .map(|d| vec![d])
                .map_err(|e| warn!("Failed to load devices: {}", e))
                .unwrap_or_default(),
            schedules: schedules
                .map_err(|e| warn!("Failed to load schedules: {}", e))
                .unwrap_or_default(),
            medlogs: medlogs
                .map_err(|e| warn!("Failed to load medication logs: {}", e))
                .unwrap_or_default(),
        }
    }

    pub async fn update_profile(&self, ctx: &SessionContext, update: &UserUpdate) -> Result<UserOut> {
        Ok(self.api.update_user(ctx.user_id, update).await?)
    }

    pub async fn create_schedule(
        &self,
        ctx: &SessionContext,
        devices: &[DeviceOut],
        pillname: &str,
        dose_time: &str,
        repeat_days: i32,
    ) -> Result<ScheduleOut> {
        let request = ScheduleRequest {
            pillname: pillname.to_string(),
            dose_time: dose_time.to_string(),
            repeat_days,
            user_id: ctx.user_id,
            device_id: default_device_id(devices).to_string(),
        };
        Ok(self.api.create_schedule(ctx.user_id, &request).await?)
    }

    pub async fn update_schedule(&self, schedule_id: Uuid, update: &ScheduleUpdate) -> Result<ScheduleOut> {
        if update.is_empty() {
            return Err(Error::InvalidInput("schedule update has no fields set".into()));
        }
        Ok(self.api.update_schedule(schedule_id, update).await?)
    }

    pub async fn delete_schedule(&self, schedule_id: Uuid) -> Result<()> {
        self.api.delete_schedule(schedule_id).await?;
        Ok(())
    }

    /// Tell the backend where to send pushes for this user
    pub async fn register_push_token(&self, ctx: &SessionContext, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(Error::InvalidInput("push token is empty".into()));
        }

        self.api
            .register_token(&TokenRegisterRequest {
                user_id: ctx.user_id,
                token: token.to_string(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(chip_id: &str) -> DeviceOut {
        DeviceOut {
            name: "Dispenser".to_string(),
            chip_id: chip_id.to_string(),
            status: "online".to_string(),
            user_id: Uuid::new_v4(),
            last_seen: None,
            api_key: "key".to_string(),
        }
    }

    #[test]
    fn test_default_device_id() {
        assert_eq!(default_device_id(&[]), DEFAULT_DEVICE_ID);
        assert_eq!(default_device_id(&[device("ESP-A"), device("ESP-B")]), "ESP-A");
        assert_eq!(Dashboard::default().device_id(), DEFAULT_DEVICE_ID);
    }

    #[tokio::test]
    async fn test_empty_schedule_update_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let api = BackendClient::new("http://127.0.0.1:9/").unwrap();
        let session = Session::new(api, CredentialStore::new(dir.path().join("c.json")));

        let result = session
            .update_schedule(Uuid::new_v4(), &ScheduleUpdate::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_logout_forgets_token_and_seen_notifications() {
        use medalert_store::{KvStore, SeenSet};

        let dir = tempfile::tempdir().unwrap();
        let api = BackendClient::new("http://127.0.0.1:9/").unwrap();
        let mut credentials = CredentialStore::new(dir.path().join("c.json"));
        credentials.set_token("127.0.0.1", "jwt", 30);
        credentials.save().unwrap();

        let seen = Arc::new(SeenStore::new(Arc::new(KvStore::in_memory().unwrap())));
        seen.save(&SeenSet::from_ids(["n-1", "n-2"])).unwrap();

        let session = Session::new(api, credentials).with_seen_store(seen.clone());
        session.logout().unwrap();

        assert!(seen.load().unwrap().is_empty());
        assert!(!CredentialStore::load(dir.path().join("c.json"))
            .unwrap()
            .has_valid_token("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_restore_without_stored_token() {
        let dir = tempfile::tempdir().unwrap();
        let api = BackendClient::new("http://127.0.0.1:9/").unwrap();
        let session = Session::new(api, CredentialStore::new(dir.path().join("c.json")));

        assert_eq!(session.restore().await.unwrap(), None);
        assert!(!session.api().has_token());
    }
}
