use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use native_tls::{Protocol, TlsConnector};

use super::{Connector, DirectoryError, DirectorySession, Entry};
use crate::config::{AuthType, DEFAULT_CIPHER, DirectoryConfig, TlsVersion, Transport};

/// `invalidCredentials` result code.
const INVALID_CREDENTIALS: u32 = 49;

/// Principal presented on bind: `DOMAIN\user` for NTLM, the bare username
/// otherwise.
pub fn bind_principal(
    config: &DirectoryConfig,
    username: &str,
) -> Result<String, DirectoryError> {
    match config.auth_type {
        AuthType::Simple => Ok(username.to_owned()),
        AuthType::Ntlm => {
            let domain = config
                .ntlm_domain
                .as_deref()
                .filter(|domain| !domain.is_empty())
                .ok_or(DirectoryError::MissingDomain)?;

            Ok(format!("{domain}\\{username}"))
        },
    }
}

fn protocol(version: TlsVersion) -> Protocol {
    match version {
        TlsVersion::V1_0 => Protocol::Tlsv10,
        TlsVersion::V1_1 => Protocol::Tlsv11,
        TlsVersion::V1_2 => Protocol::Tlsv12,
    }
}

/// [`Connector`] backed by `ldap3`.
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    url: String,
    transport: Transport,
    tls_version: TlsVersion,
    validate_cert: bool,
    timeout: Option<Duration>,
}

impl Ldap3Connector {
    /// Create a new [`Ldap3Connector`].
    pub fn new(config: &DirectoryConfig) -> Self {
        let transport = config.transport();

        if transport == Transport::Plain {
            tracing::warn!(server = %config.server, "using a non secure directory connection");
        } else if config.cipher != DEFAULT_CIPHER {
            tracing::warn!(
                cipher = %config.cipher,
                "cipher selection is left to the platform TLS stack"
            );
        }
        if !config.validate_cert {
            tracing::warn!(server = %config.server, "directory certificate validation is disabled");
        }

        Self {
            url: config.url(),
            transport,
            tls_version: config.tls_version,
            validate_cert: config.validate_cert,
            timeout: config.conn_timeout(),
        }
    }

    fn settings(&self) -> Result<LdapConnSettings, DirectoryError> {
        let mut settings = LdapConnSettings::new();

        if let Some(timeout) = self.timeout {
            settings = settings.set_conn_timeout(timeout);
        }

        if self.transport != Transport::Plain {
            let connector = TlsConnector::builder()
                .min_protocol_version(Some(protocol(self.tls_version)))
                .danger_accept_invalid_certs(!self.validate_cert)
                .danger_accept_invalid_hostnames(!self.validate_cert)
                .build()?;

            settings = settings
                .set_connector(connector)
                .set_no_tls_verify(!self.validate_cert)
                .set_starttls(self.transport == Transport::StartTls);
        }

        Ok(settings)
    }
}

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let (conn, ldap) = LdapConnAsync::with_settings(self.settings()?, &self.url)
            .await
            .map_err(DirectoryError::Connect)?;

        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                tracing::warn!(error = %err, "directory connection closed");
            }
        });

        Ok(Box::new(Ldap3Session { ldap }))
    }
}

struct Ldap3Session {
    ldap: Ldap,
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn bind(
        &mut self,
        auth: AuthType,
        principal: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        if auth != AuthType::Simple {
            return Err(DirectoryError::UnsupportedAuth(auth));
        }

        let result = self
            .ldap
            .simple_bind(principal, password)
            .await
            .map_err(DirectoryError::Bind)?;

        if result.rc == INVALID_CREDENTIALS {
            return Err(DirectoryError::InvalidCredentials);
        }

        result.success().map_err(DirectoryError::Bind)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let (entries, _) = self
            .ldap
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await
            .map_err(DirectoryError::Search)?
            .success()
            .map_err(DirectoryError::Search)?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(Entry::from)
            .collect())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.ldap.unbind().await.map_err(DirectoryError::Bind)
    }
}
