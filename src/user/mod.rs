#[cfg(test)]
pub(crate) mod memory;
mod repository;

pub use repository::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Regular (non administrator) account.
pub const ACCOUNT_TYPE_USER: i32 = 20;
/// Stored in place of a password hash for directory accounts. Never parses as
/// a PHC string, so such accounts cannot use the local password path.
pub const DIRECTORY_PASSWORD: &str = "LDAP auto-imported user";

/// User as saved on database.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct LocalUser {
    pub login: String,
    pub name: String,
    pub account_type: i32,
    #[serde(skip)]
    pub password: String,
}

impl LocalUser {
    /// Account provisioned from a successful directory login.
    pub fn from_directory(login: &str, name: Option<&str>) -> Self {
        Self {
            login: login.to_owned(),
            name: name.unwrap_or(login).to_owned(),
            account_type: ACCOUNT_TYPE_USER,
            password: DIRECTORY_PASSWORD.to_owned(),
        }
    }
}

/// Local users and their role assignments.
///
/// Both are insert-only from the login flow. Inserting an existing row is not
/// an error: concurrent first logins may both try it.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, login: &str) -> Result<Option<LocalUser>>;

    /// Returns `false` when `user.login` already exists.
    async fn insert(&self, user: &LocalUser) -> Result<bool>;

    async fn has_role(&self, login: &str, role: &str) -> Result<bool>;

    /// Returns `false` when the assignment already exists.
    async fn assign_role(&self, login: &str, role: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_user() {
        let user = LocalUser::from_directory("alice", Some("Alice Liddell"));
        assert_eq!(user.name, "Alice Liddell");
        assert_eq!(user.account_type, ACCOUNT_TYPE_USER);
        assert_eq!(user.password, DIRECTORY_PASSWORD);

        let user = LocalUser::from_directory("bob", None);
        assert_eq!(user.name, "bob");
    }
}
