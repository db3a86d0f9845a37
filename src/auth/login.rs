//! Email and password login for the local auth mode

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::password::verify_secret;
use crate::auth::provider::{AuthMode, AuthProvider};
use crate::db::CredentialStore;
use crate::types::{GateError, Result};

/// Successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub plan: String,
}

/// Checks stored credentials and mints a bearer token
#[derive(Clone)]
pub struct LocalLogin {
    provider: AuthProvider,
    store: Arc<dyn CredentialStore>,
}

impl LocalLogin {
    /// Fails unless `provider` is in local mode
    pub fn new(provider: AuthProvider, store: Arc<dyn CredentialStore>) -> Result<Self> {
        if provider.mode() != AuthMode::Local {
            return Err(GateError::Config(format!(
                "Password login is unavailable in {} mode",
                provider.mode()
            )));
        }
        Ok(Self { provider, store })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(GateError::BadRequest(
                "Missing required fields: email, password".into(),
            ));
        }

        // Same error for every failure so accounts can't be enumerated
        let invalid = || GateError::Unauthorized("Invalid credentials".into());

        let Some(user) = self.store.find_user_by_email(email).await? else {
            warn!("Login failed - user not found");
            return Err(invalid());
        };
        if !user.is_active {
            warn!(user_id = %user.id, "Login failed - account inactive");
            return Err(invalid());
        }

        let password = password.to_string();
        let hash = user.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verify_secret(&password, &hash)).await?;

        match verified {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %user.id, "Login failed - invalid password");
                return Err(invalid());
            }
            Err(e) if e.is_hash_error() => {
                warn!(user_id = %user.id, "Stored password hash is unusable: {}", e);
                return Err(invalid());
            }
            Err(e) => return Err(e),
        }

        let token = self.provider.issue_token(&user.id)?;
        info!(user_id = %user.id, "Login successful");

        Ok(LoginResponse {
            token,
            user_id: user.id,
            plan: user.plan,
        })
    }
}
