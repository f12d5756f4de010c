//! Per-task credential pool.
//!
//! Built when a task starts, consumed in the task-end epilogue. Leases are
//! owned exclusively by the task; fairness inside the pool is round-robin
//! ordered by last use, gated by the per-class cool-down. The pool also owns
//! the failure-aware lifecycle: consecutive-429 strike counting and the
//! suspension/disable reports to the admin service.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use super::admin::AdminClient;
use super::{AccountStatus, AccountType, Credential};
use crate::config::CredentialsConfig;
use crate::error::FetchError;

/// Strikes before a credential is reported suspended.
const SUSPEND_STRIKES: u8 = 3;

struct Lease {
    credential: Credential,
    last_used_at: Option<Instant>,
    strikes: u8,
}

#[derive(Default)]
struct PoolState {
    main: Vec<Lease>,
    normal: Vec<Lease>,
    /// Set when the main class is served by borrowed normal credentials.
    main_borrowed: bool,
}

/// Per-task credential lease holder.
pub struct CredentialPool {
    admin: Arc<AdminClient>,
    config: CredentialsConfig,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Create an empty pool over `admin`.
    pub fn new(admin: Arc<AdminClient>, config: CredentialsConfig) -> Self {
        Self {
            admin,
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn cooldown(&self, class: AccountType) -> Duration {
        match class {
            AccountType::Normal => Duration::from_secs(self.config.normal_cooldown_secs),
            _ => Duration::from_secs(self.config.main_cooldown_secs),
        }
    }

    /// Lease the main-class credentials if none are held yet.
    ///
    /// With `fallback_to_normal`, an empty main pool borrows from the normal
    /// pool instead of failing.
    pub async fn lease_main(&self, fallback_to_normal: bool) -> Result<(), FetchError> {
        {
            let state = self.state.lock().await;
            if !state.main.is_empty() || state.main_borrowed && !state.normal.is_empty() {
                return Ok(());
            }
        }

        let leased = self
            .admin
            .lock(AccountType::Any, self.config.main_lease_count)
            .await
            .map_err(|e| FetchError::NoCredentials {
                message: e.to_string(),
            })?;

        if !leased.is_empty() {
            let mut state = self.state.lock().await;
            state.main = leased.into_iter().map(new_lease).collect();
            return Ok(());
        }

        if fallback_to_normal {
            self.lease_normal().await?;
            let mut state = self.state.lock().await;
            if !state.normal.is_empty() {
                tracing::info!("main pool empty, borrowing from normal pool");
                state.main_borrowed = true;
                return Ok(());
            }
        }

        Err(FetchError::NoCredentials {
            message: "admin service returned no main credentials".to_string(),
        })
    }

    /// Lease the normal-class credentials if none are held yet.
    pub async fn lease_normal(&self) -> Result<(), FetchError> {
        {
            let state = self.state.lock().await;
            if !state.normal.is_empty() {
                return Ok(());
            }
        }

        let leased = self
            .admin
            .lock(AccountType::Normal, self.config.normal_lease_count)
            .await
            .map_err(|e| FetchError::NoCredentials {
                message: e.to_string(),
            })?;

        if leased.is_empty() {
            return Err(FetchError::NoCredentials {
                message: "admin service returned no normal credentials".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        state.normal = leased.into_iter().map(new_lease).collect();
        Ok(())
    }

    /// The designated main credential, leasing on first use.
    pub async fn main(&self) -> Result<Credential, FetchError> {
        self.lease_main(false).await?;
        let state = self.state.lock().await;
        let lease = if state.main_borrowed {
            state.normal.first()
        } else {
            state.main.first()
        };
        lease
            .map(|l| l.credential.clone())
            .ok_or_else(|| FetchError::NoCredentials {
                message: "main pool is empty".to_string(),
            })
    }

    /// Next credential of `class` outside its cool-down window.
    ///
    /// Rotates round-robin ordered by last use (never-used first). When every
    /// lease is cooling, sleeps and retries until one becomes eligible.
    pub async fn next_available(&self, class: AccountType) -> Result<Credential, FetchError> {
        match class {
            AccountType::Normal => self.lease_normal().await?,
            _ => self.lease_main(false).await?,
        }
        let cooldown = self.cooldown(class);

        loop {
            {
                let mut state = self.state.lock().await;
                let borrowed = state.main_borrowed;
                let leases = match class {
                    AccountType::Normal => &mut state.normal,
                    _ if borrowed => &mut state.normal,
                    _ => &mut state.main,
                };

                let now = Instant::now();
                let eligible = leases
                    .iter_mut()
                    .filter(|lease| {
                        lease
                            .last_used_at
                            .map_or(true, |at| now.duration_since(at) >= cooldown)
                    })
                    .min_by_key(|lease| lease.last_used_at);

                if let Some(lease) = eligible {
                    lease.last_used_at = Some(now);
                    return Ok(lease.credential.clone());
                }
            }

            tracing::info!(
                class = class.as_str(),
                wait_secs = self.config.all_cooling_wait_secs,
                "all credentials cooling, waiting"
            );
            tokio::time::sleep(Duration::from_secs(self.config.all_cooling_wait_secs)).await;
        }
    }

    /// Record a 429 attributed to `credential_id`.
    ///
    /// On the third consecutive strike the credential is reported
    /// `suspended` to the admin service and the counter resets.
    pub async fn record_rate_limited(&self, credential_id: i64) {
        let report = {
            let mut state = self.state.lock().await;
            let Some(lease) = find_lease(&mut state, credential_id) else {
                return;
            };
            lease.strikes += 1;
            if lease.strikes >= SUSPEND_STRIKES {
                lease.strikes = 0;
                Some(lease.credential.username.clone())
            } else {
                tracing::warn!(
                    credential_id,
                    strikes = lease.strikes,
                    "credential hit rate limit"
                );
                None
            }
        };

        if let Some(username) = report {
            if let Err(e) = self
                .admin
                .update_account_status(credential_id, &username, AccountStatus::Suspended)
                .await
            {
                tracing::warn!(credential_id, error = %e, "failed to report suspension");
            }
        }
    }

    /// Reset the strike counter after any non-429 response.
    pub async fn record_success(&self, credential_id: i64) {
        let mut state = self.state.lock().await;
        if let Some(lease) = find_lease(&mut state, credential_id) {
            lease.strikes = 0;
        }
    }

    /// Report a credential disabled after a suspension redirect.
    /// No strike threshold applies; the report goes out immediately.
    pub async fn report_suspended_redirect(&self, credential_id: i64) {
        let username = {
            let mut state = self.state.lock().await;
            find_lease(&mut state, credential_id)
                .map(|lease| lease.credential.username.clone())
                .unwrap_or_default()
        };
        if let Err(e) = self
            .admin
            .update_account_status(credential_id, &username, AccountStatus::Disabled)
            .await
        {
            tracing::warn!(credential_id, error = %e, "failed to report disable");
        }
    }

    /// Release every lease back to the admin service.
    ///
    /// Normal credentials are released with the configured server-side
    /// cool-off delay. Failures are logged; the epilogue never fails the
    /// task outcome.
    pub async fn release(&self) {
        let (main_ids, normal_ids) = {
            let mut state = self.state.lock().await;
            let main_ids: Vec<i64> = state.main.iter().map(|l| l.credential.id).collect();
            let normal_ids: Vec<i64> = state.normal.iter().map(|l| l.credential.id).collect();
            state.main.clear();
            state.normal.clear();
            state.main_borrowed = false;
            (main_ids, normal_ids)
        };

        if let Err(e) = self.admin.unlock(&main_ids, None).await {
            tracing::error!(error = %e, "failed to unlock main credentials");
        }
        if let Err(e) = self
            .admin
            .unlock(&normal_ids, Some(self.config.release_delay_secs))
            .await
        {
            tracing::error!(error = %e, "failed to unlock normal credentials");
        }
    }
}

fn new_lease(credential: Credential) -> Lease {
    Lease {
        credential,
        last_used_at: None,
        strikes: 0,
    }
}

fn find_lease(state: &mut PoolState, credential_id: i64) -> Option<&mut Lease> {
    state
        .main
        .iter_mut()
        .chain(state.normal.iter_mut())
        .find(|lease| lease.credential.id == credential_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Platform;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CredentialsConfig {
        CredentialsConfig {
            main_cooldown_secs: 5,
            normal_cooldown_secs: 60,
            main_lease_count: 1,
            normal_lease_count: 2,
            all_cooling_wait_secs: 10,
            release_delay_secs: 60,
        }
    }

    async fn mount_lock(server: &MockServer, account_type: &str, accounts: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1/twitter/accounts/lock"))
            .and(body_partial_json(serde_json::json!({"account_type": account_type})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accounts": accounts})),
            )
            .mount(server)
            .await;
    }

    fn pool_for(server: &MockServer) -> CredentialPool {
        let admin = Arc::new(AdminClient::new(server.uri(), Platform::Twitter));
        CredentialPool::new(admin, test_config())
    }

    #[tokio::test]
    async fn main_lease_returns_first_credential() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "",
            serde_json::json!([{"id": 1, "username": "m1", "headers": {}}]),
        )
        .await;

        let pool = pool_for(&server);
        let main = pool.main().await.expect("main");
        assert_eq!(main.id, 1);
        // Cached: a second call does not re-lease.
        assert_eq!(pool.main().await.expect("main").id, 1);
    }

    #[tokio::test]
    async fn main_lease_falls_back_to_normal_on_opt_in() {
        let server = MockServer::start().await;
        mount_lock(&server, "", serde_json::json!([])).await;
        mount_lock(
            &server,
            "normal",
            serde_json::json!([{"id": 10, "username": "n1", "headers": {}}]),
        )
        .await;

        let pool = pool_for(&server);
        assert!(pool.lease_main(false).await.is_err());
        pool.lease_main(true).await.expect("fallback");
        assert_eq!(pool.main().await.expect("main").id, 10);
    }

    #[tokio::test]
    async fn next_available_rotates_before_reuse() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "normal",
            serde_json::json!([
                {"id": 1, "username": "n1", "headers": {}},
                {"id": 2, "username": "n2", "headers": {}}
            ]),
        )
        .await;

        let pool = pool_for(&server);
        let first = pool.next_available(AccountType::Normal).await.expect("a");
        let second = pool.next_available(AccountType::Normal).await.expect("b");
        // Within the cool-down window the same credential is never
        // handed out twice.
        assert_ne!(first.id, second.id);
    }

    #[tokio::test(start_paused = true)]
    async fn next_available_waits_out_cooldown() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "normal",
            serde_json::json!([{"id": 1, "username": "n1", "headers": {}}]),
        )
        .await;

        let pool = pool_for(&server);
        let start = Instant::now();
        let first = pool.next_available(AccountType::Normal).await.expect("a");
        let second = pool.next_available(AccountType::Normal).await.expect("b");
        assert_eq!(first.id, second.id);
        // The single credential forced a wait of at least its cool-down.
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn three_strikes_publish_one_suspension() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "normal",
            serde_json::json!([{"id": 5, "username": "n5", "headers": {}}]),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/v1/twitter/accounts/update_status"))
            .and(body_partial_json(serde_json::json!({
                "id": 5,
                "status": "suspended"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let pool = pool_for(&server);
        pool.lease_normal().await.expect("lease");
        pool.record_rate_limited(5).await;
        pool.record_rate_limited(5).await;
        pool.record_rate_limited(5).await;
        // Counter reset: two more strikes stay below the threshold.
        pool.record_rate_limited(5).await;
        pool.record_rate_limited(5).await;
    }

    #[tokio::test]
    async fn success_resets_strike_counter() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "normal",
            serde_json::json!([{"id": 5, "username": "n5", "headers": {}}]),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/v1/twitter/accounts/update_status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let pool = pool_for(&server);
        pool.lease_normal().await.expect("lease");
        pool.record_rate_limited(5).await;
        pool.record_rate_limited(5).await;
        pool.record_success(5).await;
        pool.record_rate_limited(5).await;
        pool.record_rate_limited(5).await;
        // Never three consecutive: no suspension published.
    }

    #[tokio::test]
    async fn redirect_publishes_disabled_immediately() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "",
            serde_json::json!([{"id": 7, "username": "m7", "headers": {}}]),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/v1/twitter/accounts/update_status"))
            .and(body_partial_json(serde_json::json!({
                "id": 7,
                "status": "disabled"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let pool = pool_for(&server);
        pool.lease_main(false).await.expect("lease");
        pool.report_suspended_redirect(7).await;
    }

    #[tokio::test]
    async fn release_unlocks_with_delay_for_normal() {
        let server = MockServer::start().await;
        mount_lock(
            &server,
            "",
            serde_json::json!([{"id": 1, "username": "m1", "headers": {}}]),
        )
        .await;
        mount_lock(
            &server,
            "normal",
            serde_json::json!([{"id": 2, "username": "n1", "headers": {}}]),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/v1/twitter/accounts/unlock"))
            .and(body_partial_json(serde_json::json!({"ids": [1]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/twitter/accounts/unlock"))
            .and(body_partial_json(serde_json::json!({"ids": [2], "delay": 60})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let pool = pool_for(&server);
        pool.lease_main(false).await.expect("main");
        pool.lease_normal().await.expect("normal");
        pool.release().await;
    }
}
