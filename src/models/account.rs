use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_TRIAL_MESSAGE: &str = "Your free trial has ended";
pub const DEFAULT_UPGRADE_URL: &str = "/pricing";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

/// Tokens and profile returned by a successful login or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

/// Registration input as typed by the user, validated before any network call.
#[derive(Debug, Clone, Validate)]
pub struct RegistrationForm {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Company name is required"))]
    pub company_name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    /// Runs field validation and the password confirmation check.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|errors| first_validation_message(&errors))?;
        if self.password != self.confirm_password {
            return Err("Passwords do not match".to_string());
        }
        Ok(())
    }
}

/// Picks the first human readable message out of a validator error set.
pub(crate) fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|err| err.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

/// Payload the backend attaches to a 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialNotice {
    pub status: u16,
    pub message: String,
    pub upgrade_url: String,
}

impl Default for TrialNotice {
    fn default() -> Self {
        Self {
            status: 402,
            message: DEFAULT_TRIAL_MESSAGE.to_string(),
            upgrade_url: DEFAULT_UPGRADE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub plan: String,
    pub is_active: bool,
    pub days_remaining: i64,
    pub trial_ends_at: Option<DateTime<Utc>>,
}
