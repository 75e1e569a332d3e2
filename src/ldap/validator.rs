use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::connection::{Ldap3Connector, bind_principal};
use super::resolver::{Grant, GroupResolver, for_config};
use super::{Connector, DirectoryError};
use crate::config::DirectoryConfig;

/// Outcome of a directory login. Failures carry no detail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindResult {
    pub success: bool,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

impl BindResult {
    pub fn refused() -> Self {
        Self::default()
    }
}

impl From<Grant> for BindResult {
    fn from(grant: Grant) -> Self {
        Self {
            success: true,
            display_name: grant.display_name,
            role: Some(grant.role),
        }
    }
}

/// Decides whether a username/password pair may log in.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, username: &str, password: &str) -> BindResult;
}

/// [`CredentialValidator`] asking the configured directory.
pub struct DirectoryValidator {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn Connector>,
    resolver: Box<dyn GroupResolver>,
}

impl DirectoryValidator {
    /// Create a new [`DirectoryValidator`] using `ldap3`.
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        let connector = Box::new(Ldap3Connector::new(&config));
        Self::with_connector(config, connector)
    }

    /// Use another transport, e.g. an in-memory directory.
    pub fn with_connector(config: Arc<DirectoryConfig>, connector: Box<dyn Connector>) -> Self {
        let resolver = for_config(Arc::clone(&config));
        Self {
            config,
            connector,
            resolver,
        }
    }

    async fn try_validate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Grant, DirectoryError> {
        if password.is_empty() {
            return Err(DirectoryError::EmptyPassword);
        }
        let principal = bind_principal(&self.config, username)?;

        let mut session = self.connector.connect().await?;
        let result = match session
            .bind(self.config.auth_type, &principal, password)
            .await
        {
            Ok(()) => self.resolver.resolve(session.as_mut(), username).await,
            Err(err) => Err(err),
        };

        if let Err(err) = session.unbind().await {
            tracing::debug!(error = %err, "directory unbind failed");
        }

        result
    }
}

#[async_trait]
impl CredentialValidator for DirectoryValidator {
    async fn validate(&self, username: &str, password: &str) -> BindResult {
        let start = Instant::now();
        let result = self.try_validate(username, password).await;
        let latency = start.elapsed().as_secs_f64();

        let outcome = match &result {
            Ok(grant) => {
                tracing::info!(user = %username, role = %grant.role, "directory login granted");
                "granted"
            },
            Err(err @ (DirectoryError::InvalidCredentials | DirectoryError::Unmapped)) => {
                tracing::info!(user = %username, reason = err.reason(), error = %err, "directory login refused");
                err.reason()
            },
            Err(err) => {
                tracing::warn!(user = %username, reason = err.reason(), error = %err, "directory login failed");
                err.reason()
            },
        };

        metrics::counter!("directory_authentications_total", "outcome" => outcome).increment(1);
        metrics::histogram!("directory_authentication_duration_seconds").record(latency);

        result.map(BindResult::from).unwrap_or_else(|_| BindResult::refused())
    }
}
