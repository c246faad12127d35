use serde_json::{json, Value};
use tracing::instrument;

use super::{ApiClient, RequestOptions};
use crate::errors::{ClientError, ClientResult};
use crate::models::TrialInfo;
use crate::normalize;

impl ApiClient {
    /// `GET /api/trial/info`
    pub async fn trial_info(&self) -> ClientResult<TrialInfo> {
        let response = self.get("/api/trial/info").await?;
        Ok(normalize::normalize_trial_info(&response))
    }

    /// `POST /api/trial/upgrade`
    #[instrument(skip(self))]
    pub async fn upgrade_trial(&self, plan_tier: &str) -> ClientResult<Value> {
        let plan_tier = plan_tier.trim();
        if plan_tier.is_empty() {
            return Err(ClientError::validation("Plan tier is required"));
        }
        self.post(
            "/api/trial/upgrade",
            RequestOptions::json(json!({ "plan_tier": plan_tier })),
        )
        .await
    }
}
