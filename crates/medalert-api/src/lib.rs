// REST client for the medication backend
pub mod client;
pub mod error;
pub mod models;
pub mod notifications;
pub mod retry;

// Re-export common types
pub use client::BackendClient;
pub use error::{ApiError, Result};
pub use models::{
    AdherenceSummary, DeviceOut, LoginRequest, LoginResponse, MeResponse, MedlogOut,
    MessageResponse, NextDoseInfo, RegisterRequest, RegisterResponse, ScheduleOut,
    ScheduleRequest, ScheduleUpdate, TokenRegisterRequest, UserOut, UserUpdate,
};
pub use notifications::Notification;
pub use retry::RetryConfig;
