//! Login orchestration.
//!
//! Directory logins provision a local account on first success and link it to
//! the mapped role. Excluded logins use the local password path instead and
//! never reach the directory.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use async_trait::async_trait;

use crate::clock::Clock;
use crate::config::DirectoryConfig;
use crate::error::{Result, ServerError};
use crate::ldap::CredentialValidator;
use crate::session::Session;
use crate::user::{LocalUser, UserRepository};

/// Login path for accounts kept out of the directory.
#[async_trait]
pub trait PrimaryLogin: Send + Sync {
    async fn login(&self, session: &mut Session, login: &str, password: &str) -> Result<bool>;
}

/// [`PrimaryLogin`] checking the argon2 hash stored with the local account.
pub struct LocalPasswordLogin {
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl LocalPasswordLogin {
    pub fn new(users: Arc<dyn UserRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { users, clock }
    }
}

#[async_trait]
impl PrimaryLogin for LocalPasswordLogin {
    async fn login(&self, session: &mut Session, login: &str, password: &str) -> Result<bool> {
        let Some(user) = self.users.find(login).await? else {
            tracing::info!(user = %login, "local login refused, unknown account");
            return Ok(false);
        };

        // directory accounts store a marker, not a PHC string.
        let verified = PasswordHash::new(&user.password)
            .map(|hash| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false);

        if verified {
            session.establish(login, self.clock.now());
            tracing::info!(user = %login, "local login granted");
        } else {
            tracing::info!(user = %login, "local login refused");
        }
        metrics::counter!("local_authentications_total", "outcome" => if verified { "granted" } else { "refused" })
            .increment(1);

        Ok(verified)
    }
}

/// Entry point of every login attempt.
pub struct LoginService {
    config: Arc<DirectoryConfig>,
    validator: Arc<dyn CredentialValidator>,
    users: Arc<dyn UserRepository>,
    primary: Arc<dyn PrimaryLogin>,
    clock: Arc<dyn Clock>,
}

impl LoginService {
    /// Create a new [`LoginService`].
    pub fn new(
        config: Arc<DirectoryConfig>,
        validator: Arc<dyn CredentialValidator>,
        users: Arc<dyn UserRepository>,
        primary: Arc<dyn PrimaryLogin>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            validator,
            users,
            primary,
            clock,
        }
    }

    /// Route `login` to the directory or, when excluded, to the primary path.
    pub async fn login(
        &self,
        session: &mut Session,
        login: Option<&str>,
        password: Option<&str>,
    ) -> Result<bool> {
        let (Some(login), Some(password)) = (login, password) else {
            return Err(ServerError::MissingCredentials);
        };

        if self.config.is_excluded(login) {
            tracing::debug!(user = %login, "login excluded from directory");
            return self.primary.login(session, login, password).await;
        }

        self.directory_login(session, login, password).await
    }

    /// Validate against the directory, then provision the local account and
    /// its role when missing.
    ///
    /// The account and the role assignment are written separately: a failure
    /// in between leaves an account without role, filled on next login.
    pub async fn directory_login(
        &self,
        session: &mut Session,
        login: &str,
        password: &str,
    ) -> Result<bool> {
        let result = self.validator.validate(login, password).await;
        if !result.success {
            return Ok(false);
        }

        if self.users.find(login).await?.is_none() {
            let user = LocalUser::from_directory(login, result.display_name.as_deref());
            if self.users.insert(&user).await? {
                tracing::info!(user = %login, name = %user.name, "local account provisioned");
            } else {
                tracing::debug!(user = %login, "local account provisioned concurrently");
            }
        }

        if let Some(role) = result.role.as_deref() {
            if !self.users.has_role(login, role).await?
                && self.users.assign_role(login, role).await?
            {
                tracing::info!(user = %login, %role, "role assigned");
            }
        }

        session.establish(login, self.clock.now());
        Ok(true)
    }
}
