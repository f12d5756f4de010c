//! Reqwest client for the admin credential service.
//!
//! The service exposes lock/unlock endpoints per platform plus a status
//! update for credentials that can no longer be safely used. Resolving the
//! service address through a registry is the deployment's concern; the
//! engine receives the resolved base URL from configuration.

use serde::{Deserialize, Serialize};

use super::{AccountStatus, AccountType, Credential};
use crate::error::AdminError;
use crate::task::Platform;

/// HTTP client for the admin credential service.
pub struct AdminClient {
    client: reqwest::Client,
    base_url: String,
    platform: Platform,
}

#[derive(Serialize)]
struct LockRequest<'a> {
    count: u32,
    account_type: &'a str,
}

#[derive(Deserialize)]
struct LockResponse {
    #[serde(default)]
    accounts: Vec<Credential>,
}

#[derive(Serialize)]
struct UnlockRequest<'a> {
    ids: &'a [i64],
    #[serde(skip_serializing_if = "Option::is_none")]
    delay: Option<u64>,
}

#[derive(Deserialize)]
struct UnlockResponse {
    #[serde(default)]
    success: bool,
}

#[derive(Serialize)]
struct StatusUpdateRequest<'a> {
    id: i64,
    username: &'a str,
    status: &'a str,
}

impl AdminClient {
    /// Create a client for `platform` against `base_url`.
    pub fn new(base_url: impl Into<String>, platform: Platform) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            platform,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/v1/{}/accounts/{suffix}", self.base_url, self.platform)
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, AdminError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| AdminError::Network { source })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdminError::Api { status, message });
        }

        response
            .json::<R>()
            .await
            .map_err(|source| AdminError::Network { source })
    }

    /// Lease up to `count` credentials of `account_type`.
    /// An empty list is a valid answer; the caller decides how to degrade.
    pub async fn lock(
        &self,
        account_type: AccountType,
        count: u32,
    ) -> Result<Vec<Credential>, AdminError> {
        let response: LockResponse = self
            .post_json(
                &self.url("lock"),
                &LockRequest {
                    count,
                    account_type: account_type.as_str(),
                },
            )
            .await?;
        tracing::info!(
            platform = %self.platform,
            account_type = account_type.as_str(),
            leased = response.accounts.len(),
            "leased credentials"
        );
        Ok(response.accounts)
    }

    /// Release credentials. `delay` asks the server to keep them out of
    /// circulation for a cool-off window before the next leaser.
    pub async fn unlock(&self, ids: &[i64], delay: Option<u64>) -> Result<bool, AdminError> {
        if ids.is_empty() {
            return Ok(true);
        }
        let response: UnlockResponse = self
            .post_json(&self.url("unlock"), &UnlockRequest { ids, delay })
            .await?;
        Ok(response.success)
    }

    /// Report a credential as suspended or disabled.
    pub async fn update_account_status(
        &self,
        id: i64,
        username: &str,
        status: AccountStatus,
    ) -> Result<(), AdminError> {
        self.post_json::<_, serde_json::Value>(
            &self.url("update_status"),
            &StatusUpdateRequest {
                id,
                username,
                status: status.as_str(),
            },
        )
        .await?;
        tracing::warn!(
            platform = %self.platform,
            credential_id = id,
            username,
            status = status.as_str(),
            "reported credential status to admin service"
        );
        Ok(())
    }
}
