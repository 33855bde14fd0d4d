use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Auth

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
}

pub fn default_role() -> String {
    "patient".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    pub email: String,
    pub message: String,
}

/// Identity of whoever the bearer token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: Uuid,
}

// Users

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOut {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Partial profile update, absent fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextDoseInfo {
    pub next_dose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdherenceSummary {
    pub user_id: String,
    pub adherence_streak: i32,
    pub next_dose: Option<NextDoseInfo>,
    pub weekly_adherence: f64,
}

// Devices

/// The pill dispenser paired with a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOut {
    pub name: String,
    pub chip_id: String,
    pub status: String,
    pub user_id: Uuid,
    pub last_seen: Option<String>,
    pub api_key: String,
}

// Schedules

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub pillname: String,
    pub dose_time: String,
    pub repeat_days: i32,
    pub user_id: Uuid,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOut {
    pub id: Uuid,
    pub pillname: String,
    pub dose_time: String,
    pub repeat_days: i32,
    pub user_id: Uuid,
    pub device_id: String,
}

/// Partial schedule update, only the fields that are set get sent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pillname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dose_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_days: Option<i32>,
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        self.pillname.is_none() && self.dose_time.is_none() && self.repeat_days.is_none()
    }
}

// Medication logs

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedlogOut {
    pub id: Uuid,
    pub pillname: String,
    pub scheduled_time: String,
    pub status: String,
    pub user_id: Uuid,
    pub device_id: String,
}

// Push tokens

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRegisterRequest {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_update_skips_unset_fields() {
        let update = ScheduleUpdate {
            dose_time: Some("08:00".to_string()),
            ..Default::default()
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "dose_time": "08:00" }));
        assert!(!update.is_empty());
        assert!(ScheduleUpdate::default().is_empty());
    }

    #[test]
    fn test_register_request_defaults_role() {
        let parsed: RegisterRequest =
            serde_json::from_str(r#"{"name":"A","email":"a@b.c","password":"pw"}"#).unwrap();
        assert_eq!(parsed.role, "patient");
    }

    #[test]
    fn test_adherence_summary_without_next_dose() {
        let json = r#"{"user_id":"u","adherence_streak":4,"next_dose":null,"weekly_adherence":0.75}"#;
        let summary: AdherenceSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.adherence_streak, 4);
        assert!(summary.next_dose.is_none());
    }
}
