//! Directory (LDAP/Active Directory) support.
//!
//! A login opens one [`DirectorySession`] through a [`Connector`], binds as
//! the user, resolves the user's groups with a [`GroupResolver`] and drops the
//! connection. Every failure is a [`DirectoryError`], which the
//! [`DirectoryValidator`] turns into a plain refused [`BindResult`].

mod connection;
mod filter;
mod resolver;
#[cfg(test)]
pub(crate) mod testing;
mod validator;

use std::collections::HashMap;

use async_trait::async_trait;
use ldap3::{LdapError, SearchEntry};

use crate::config::AuthType;

pub use connection::{Ldap3Connector, bind_principal};
pub use filter::{MATCHING_RULE_IN_CHAIN, chained_filter, escape, user_filter};
pub use resolver::{ChainedMatching, DirectMembership, Grant, GroupResolver};
pub use validator::{BindResult, CredentialValidator, DirectoryValidator};

/// Why a directory login did not go through.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("empty password")]
    EmptyPassword,
    #[error("NTLM bind requires `ntlm_domain`")]
    MissingDomain,
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("directory unreachable: {0}")]
    Connect(#[source] LdapError),
    #[error("{0:?} bind is not supported")]
    UnsupportedAuth(AuthType),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("bind rejected: {0}")]
    Bind(#[source] LdapError),
    #[error("search failed: {0}")]
    Search(#[source] LdapError),
    #[error("expected exactly one directory entry, found {0}")]
    UnexpectedEntries(usize),
    #[error("user is not in an authorized group")]
    Unmapped,
}

impl DirectoryError {
    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyPassword => "empty_password",
            Self::MissingDomain => "missing_domain",
            Self::Tls(_) => "tls",
            Self::Connect(_) => "unreachable",
            Self::UnsupportedAuth(_) => "unsupported_auth",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Bind(_) => "bind",
            Self::Search(_) => "search",
            Self::UnexpectedEntries(_) => "unexpected_entries",
            Self::Unmapped => "unmapped",
        }
    }
}

/// Directory entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl Entry {
    /// Values of `attr`. Attribute names compare case-insensitively.
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// First value of `attr`, if any.
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }
}

impl From<SearchEntry> for Entry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
        }
    }
}

/// Open connection to a directory.
#[async_trait]
pub trait DirectorySession: Send {
    /// Authenticate `principal` on this connection.
    async fn bind(
        &mut self,
        auth: AuthType,
        principal: &str,
        password: &str,
    ) -> Result<(), DirectoryError>;

    /// Subtree search under `base`.
    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError>;

    async fn unbind(&mut self) -> Result<(), DirectoryError>;
}

/// Opens a fresh [`DirectorySession`] per login.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}
