//! Provider account credentials, stored per user.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Credentials obtained from the upstream OAuth exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub grant_id: String,
    pub access_token: String,
    pub email: String,
    pub provider: String,
    /// Epoch seconds. `None` means the grant does not expire.
    pub expires_at: Option<i64>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl Credentials {
    /// Whether the expiry (if any) lies after `now` (epoch seconds).
    pub fn is_unexpired_at(&self, now: i64) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => now < expires_at,
        }
    }

    pub fn is_unexpired(&self) -> bool {
        self.is_unexpired_at(Utc::now().timestamp())
    }
}
