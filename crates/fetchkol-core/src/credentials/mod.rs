//! Credential leasing and lifecycle.
//!
//! Credentials are pre-authenticated header bundles leased from an external
//! admin service for the duration of one fetch task. Two classes exist:
//! `main` (quota-sensitive endpoints, short cool-down) and `normal`
//! (higher-volume endpoints, long cool-down). The per-task [`pool::CredentialPool`]
//! owns every lease exclusively until the task-end release epilogue.

pub mod admin;
pub mod pool;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Credential class requested from the admin service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountType {
    /// Reserved for quota-sensitive endpoints (similar-users fan-out).
    Main,
    /// Higher-volume, lower-trust endpoints (search, tweet listing).
    Normal,
    /// Any class; serialized as the empty string.
    Any,
}

impl AccountType {
    /// Wire value sent in lock requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Main => "main",
            AccountType::Normal => "normal",
            AccountType::Any => "",
        }
    }
}

/// Terminal credential states reported back to the admin service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Three consecutive rate-limit strikes.
    Suspended,
    /// The platform redirected to its suspension page.
    Disabled,
}

impl AccountStatus {
    /// Wire value sent in status updates.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Suspended => "suspended",
            AccountStatus::Disabled => "disabled",
        }
    }
}

/// A leased upstream credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Admin-service id of the account.
    pub id: i64,
    /// Account username, for status updates and logs.
    #[serde(default)]
    pub username: String,
    /// Opaque request headers: authorization, csrf token, cookie, and
    /// optionally a client transaction token.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Credential {
    /// A header value by name, or empty.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map_or("", String::as_str)
    }
}
