use serde_json::{json, Value};
use tracing::instrument;

use super::{ApiClient, RequestOptions};
use crate::errors::{ClientError, ClientResult};
use crate::models::{IssuedTokens, RegistrationForm, UserProfile};
use crate::normalize;

impl ApiClient {
    /// `POST /auth/login`
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        stay_logged_in: bool,
    ) -> ClientResult<IssuedTokens> {
        let body = json!({
            "email": email.trim(),
            "password": password,
            "stay_logged_in": stay_logged_in,
        });
        let response = self
            .post("/auth/login", RequestOptions::json(body).anonymous())
            .await?;
        normalize::normalize_tokens(&response)
            .ok_or_else(|| ClientError::Internal("login response carried no access token".into()))
    }

    /// `POST /auth/register`. The form is expected to be checked already.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn register(&self, form: &RegistrationForm) -> ClientResult<Value> {
        let body = json!({
            "full_name": form.full_name.trim(),
            "company_name": form.company_name.trim(),
            "email": form.email.trim().to_lowercase(),
            "password": form.password,
        });
        self.post("/auth/register", RequestOptions::json(body).anonymous())
            .await
    }

    /// `GET /auth/me`
    pub async fn current_user(&self) -> ClientResult<UserProfile> {
        let response = self.get("/auth/me").await?;
        normalize::normalize_user(&response)
            .ok_or_else(|| ClientError::Internal("profile response was not an object".into()))
    }

    /// `POST /auth/refresh-token`
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> ClientResult<IssuedTokens> {
        let body = json!({ "refresh_token": refresh_token });
        let response = self
            .post("/auth/refresh-token", RequestOptions::json(body).anonymous())
            .await?;
        normalize::normalize_tokens(&response).ok_or_else(|| {
            ClientError::SessionExpired("refresh response carried no access token".into())
        })
    }

    /// `POST /auth/logout`, revoking the current bearer token server-side.
    pub async fn logout(&self) -> ClientResult<()> {
        self.post("/auth/logout", RequestOptions::default())
            .await
            .map(|_| ())
    }

    /// `POST /auth/forgot-password`. Returns the server's confirmation text, if any.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> ClientResult<Option<String>> {
        let body = json!({ "email": email.trim() });
        let response = self
            .post("/auth/forgot-password", RequestOptions::json(body).anonymous())
            .await?;
        Ok(normalize::error_message(&response))
    }

    /// `POST /auth/reset-password` with the emailed one-time code.
    #[instrument(skip(self, otp, new_password))]
    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        new_password: &str,
    ) -> ClientResult<Option<String>> {
        let body = json!({
            "email": email.trim(),
            "otp": otp.trim(),
            "new_password": new_password,
        });
        let response = self
            .post("/auth/reset-password", RequestOptions::json(body).anonymous())
            .await?;
        Ok(normalize::error_message(&response))
    }
}
