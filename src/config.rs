//! Configuration manager for ldapgate.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that may occur during the configuration loading process.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("missing `ldap` entry on configuration file")]
    MissingDirectory,
    #[error("invalid `ldap.{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// HTTP listening port.
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Where a successful login lands.
    #[serde(default = "default_index")]
    pub index: String,
    /// Session lifetime, in seconds.
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: u64,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to directory (LDAP/AD) configuration.
    #[serde(skip_serializing)]
    pub ldap: Option<DirectoryConfig>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: String::default(),
            port: default_http_port(),
            index: default_index(),
            session_lifetime: default_session_lifetime(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            ldap: None,
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// How the directory connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Ldaps,
    StartTls,
}

/// Bind mechanism used against the directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    #[default]
    Simple,
    Ntlm,
}

/// Minimum TLS protocol version accepted from the directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[default]
    #[serde(rename = "1.2")]
    V1_2,
}

/// Directory group granting an internal role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping {
    /// Group DN as stored in the directory.
    pub ldap_group: String,
    /// Role granted to members.
    pub role: String,
}

/// Directory (LDAP/AD) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Hostname of the directory server.
    pub server: String,
    pub port: u16,
    pub use_ldaps: bool,
    pub use_starttls: bool,
    pub tls_version: TlsVersion,
    pub validate_cert: bool,
    /// Preferred cipher suite. Selection belongs to the platform TLS stack.
    pub cipher: String,
    pub auth_type: AuthType,
    /// Down-level domain used by NTLM binds.
    pub ntlm_domain: Option<String>,
    pub user_class: String,
    pub user_id_attribute: String,
    pub user_name_attribute: String,
    pub user_groups_attribute: String,
    pub search_base: String,
    /// Server evaluates nested groups (`LDAP_MATCHING_RULE_IN_CHAIN`).
    pub matching_rule_in_chain: bool,
    pub group_map: Vec<GroupMapping>,
    /// Logins handled by the local password path instead.
    pub excluded_users: Vec<String>,
    /// Connect timeout, in seconds.
    pub timeout: Option<u64>,
}

pub const DEFAULT_CIPHER: &str = "ECDHE-RSA-AES256-SHA384";

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            server: "localhost".into(),
            port: 389,
            use_ldaps: false,
            use_starttls: false,
            tls_version: TlsVersion::default(),
            validate_cert: true,
            cipher: DEFAULT_CIPHER.into(),
            auth_type: AuthType::default(),
            ntlm_domain: None,
            user_class: "user".into(),
            user_id_attribute: "uid".into(),
            user_name_attribute: "cn".into(),
            user_groups_attribute: "memberOf".into(),
            search_base: String::default(),
            matching_rule_in_chain: false,
            group_map: Vec::new(),
            excluded_users: Vec::new(),
            timeout: None,
        }
    }
}

impl DirectoryConfig {
    /// Transport selected by the `use_starttls` and `use_ldaps` flags.
    ///
    /// StartTLS takes precedence when both are set.
    pub fn transport(&self) -> Transport {
        if self.use_starttls {
            Transport::StartTls
        } else if self.use_ldaps {
            Transport::Ldaps
        } else {
            Transport::Plain
        }
    }

    /// Directory URL for the selected transport.
    pub fn url(&self) -> String {
        let scheme = match self.transport() {
            Transport::Ldaps => "ldaps",
            Transport::Plain | Transport::StartTls => "ldap",
        };
        format!("{scheme}://{}:{}", self.server, self.port)
    }

    pub fn conn_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Whether `login` must skip the directory.
    pub fn is_excluded(&self, login: &str) -> bool {
        self.excluded_users.iter().any(|user| user == login)
    }

    /// Reject configurations that can never bind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::Invalid {
                field: "server",
                message: "must not be empty",
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                message: "must not be zero",
            });
        }
        // ldap3 0.11 has no NTLM SASL mechanism.
        if self.auth_type == AuthType::Ntlm {
            return Err(ConfigError::Invalid {
                field: "auth_type",
                message: "NTLM binds are not supported, use SIMPLE",
            });
        }
        for (field, value) in [
            ("user_class", &self.user_class),
            ("user_id_attribute", &self.user_id_attribute),
            ("user_name_attribute", &self.user_name_attribute),
            ("user_groups_attribute", &self.user_groups_attribute),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must not be empty",
                });
            }
        }

        if self.use_ldaps && self.use_starttls {
            tracing::warn!("both `use_ldaps` and `use_starttls` set, using StartTLS");
        }
        if self.group_map.is_empty() {
            tracing::warn!("`group_map` is empty, every directory login will be refused");
        }

        Ok(())
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_index() -> String {
    "/".into()
}

fn default_session_lifetime() -> u64 {
    8 * 60 * 60
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime)
    }

    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Configuration = serde_yaml::from_str(content)?;
        config.version = VERSION.to_owned();
        config.check()?;
        Ok(config)
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let file = File::open(&file_path).inspect_err(|err| {
            tracing::error!(error = %err, path = %file_path.display(), "configuration file not found");
        })?;
        let mut config: Configuration = serde_yaml::from_reader(file)?;

        // set app version.
        config.version = VERSION.to_owned();
        config.path = file_path;
        config.check()?;

        Ok(Arc::new(config))
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.ldap
            .as_ref()
            .ok_or(ConfigError::MissingDirectory)?
            .validate()
    }
}
