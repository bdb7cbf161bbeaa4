//! Local admin credential store.

use crate::config::AdminAccount;
use crate::errors::{AuthError, Result};
use crate::identity::{Identity, Role};
use crate::security::SecureComparison;
use serde::{Deserialize, Serialize};

/// Username and password as posted by the login form.
#[derive(Clone, Deserialize)]
pub struct PasswordCredential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Static table of local admin principals.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    admins: Vec<AdminAccount>,
}

/// Body returned by a successful local login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&Identity> for LoginResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            username: identity.display_name.clone(),
            email: identity.email.clone(),
            role: identity.role,
        }
    }
}

impl CredentialStore {
    pub fn new(admins: Vec<AdminAccount>) -> Self {
        Self { admins }
    }

    /// Check a username/password pair.
    ///
    /// Every configured account is compared so the time taken does not depend
    /// on which entry (if any) matched.
    pub fn verify(&self, credential: &PasswordCredential) -> Result<Identity> {
        let mut matched: Option<&AdminAccount> = None;
        for admin in &self.admins {
            let user_ok = SecureComparison::constant_time_eq(&admin.username, &credential.username);
            let pass_ok = SecureComparison::constant_time_eq(&admin.password, &credential.password);
            if user_ok && pass_ok && matched.is_none() {
                matched = Some(admin);
            }
        }

        match matched {
            Some(admin) => Ok(Identity::new(
                admin.id.clone(),
                admin.username.clone(),
                admin.email.clone(),
                Role::Admin,
            )),
            None => {
                tracing::warn!(username = %credential.username, "local login rejected");
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}
