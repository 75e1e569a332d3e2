//! Group membership resolution.
//!
//! Two strategies map a bound user onto a configured role:
//! - [`ChainedMatching`] asks the server, one search per mapping, using the
//!   nested-group matching rule.
//! - [`DirectMembership`] fetches the user once and checks its direct group
//!   values locally.
//!
//! Both honor the order of `group_map`: the first mapping found wins.

use std::sync::Arc;

use async_trait::async_trait;

use super::filter::{chained_filter, user_filter};
use super::{DirectoryError, DirectorySession, Entry};
use crate::config::{DirectoryConfig, GroupMapping};

/// Role granted to an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub display_name: Option<String>,
    pub role: String,
}

impl Grant {
    fn new(config: &DirectoryConfig, entry: &Entry, mapping: &GroupMapping) -> Self {
        Self {
            display_name: entry.first(&config.user_name_attribute).map(str::to_owned),
            role: mapping.role.clone(),
        }
    }
}

#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Map `uid` onto the first matching [`GroupMapping`].
    async fn resolve(
        &self,
        session: &mut dyn DirectorySession,
        uid: &str,
    ) -> Result<Grant, DirectoryError>;
}

/// Pick the strategy the directory supports.
pub fn for_config(config: Arc<DirectoryConfig>) -> Box<dyn GroupResolver> {
    if config.matching_rule_in_chain {
        Box::new(ChainedMatching::new(config))
    } else {
        Box::new(DirectMembership::new(config))
    }
}

fn requested_attributes(config: &DirectoryConfig) -> [&str; 2] {
    [
        config.user_name_attribute.as_str(),
        config.user_groups_attribute.as_str(),
    ]
}

/// Server-side nested group evaluation (Active Directory).
pub struct ChainedMatching {
    config: Arc<DirectoryConfig>,
}

impl ChainedMatching {
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GroupResolver for ChainedMatching {
    async fn resolve(
        &self,
        session: &mut dyn DirectorySession,
        uid: &str,
    ) -> Result<Grant, DirectoryError> {
        let config = &self.config;

        for mapping in &config.group_map {
            let filter = chained_filter(
                &config.user_class,
                &config.user_id_attribute,
                uid,
                &config.user_groups_attribute,
                &mapping.ldap_group,
            );
            let entries = session
                .search(&config.search_base, &filter, &requested_attributes(config))
                .await?;

            match entries.as_slice() {
                [entry] => return Ok(Grant::new(config, entry, mapping)),
                [] => {},
                _ => tracing::debug!(
                    %uid,
                    group = %mapping.ldap_group,
                    count = entries.len(),
                    "ambiguous directory entries, skipping mapping"
                ),
            }
        }

        Err(DirectoryError::Unmapped)
    }
}

/// Local check of the user's direct groups.
pub struct DirectMembership {
    config: Arc<DirectoryConfig>,
}

impl DirectMembership {
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GroupResolver for DirectMembership {
    async fn resolve(
        &self,
        session: &mut dyn DirectorySession,
        uid: &str,
    ) -> Result<Grant, DirectoryError> {
        let config = &self.config;
        let filter = user_filter(&config.user_class, &config.user_id_attribute, uid);

        let entries = session
            .search(&config.search_base, &filter, &requested_attributes(config))
            .await?;
        let [entry] = entries.as_slice() else {
            return Err(DirectoryError::UnexpectedEntries(entries.len()));
        };

        let groups = entry.values(&config.user_groups_attribute);
        config
            .group_map
            .iter()
            .find(|mapping| {
                groups
                    .iter()
                    .any(|group| group.eq_ignore_ascii_case(&mapping.ldap_group))
            })
            .map(|mapping| Grant::new(config, entry, mapping))
            .ok_or(DirectoryError::Unmapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::testing::{FakeDirectory, FakeUser, directory_config};

    fn fixture() -> FakeDirectory {
        FakeDirectory::default()
            .with_user(
                FakeUser::new("alice", "correctpw")
                    .name("Alice Liddell")
                    .group("cn=eng,dc=x"),
            )
            .with_user(FakeUser::new("bob", "pw").group("cn=sales,dc=x"))
            .with_user(FakeUser::new("admin", "root").group("cn=ops,dc=x"))
            .with_user(
                FakeUser::new("carol", "pw")
                    .group("cn=eng,dc=x")
                    .group("cn=ops,dc=x"),
            )
    }

    fn resolvers(
        config: &Arc<DirectoryConfig>,
    ) -> [(&'static str, Box<dyn GroupResolver>); 2] {
        [
            (
                "chained",
                Box::new(ChainedMatching::new(Arc::clone(config))) as Box<dyn GroupResolver>,
            ),
            (
                "direct",
                Box::new(DirectMembership::new(Arc::clone(config))) as Box<dyn GroupResolver>,
            ),
        ]
    }

    #[tokio::test]
    async fn test_both_strategies_map_role() {
        let config = Arc::new(directory_config());
        let directory = fixture();

        for (name, resolver) in resolvers(&config) {
            let mut session = directory.session();
            let grant = resolver.resolve(&mut session, "alice").await.unwrap();

            assert_eq!(grant.role, "engineer", "{name}");
            assert_eq!(grant.display_name.as_deref(), Some("Alice Liddell"), "{name}");
        }
    }

    #[tokio::test]
    async fn test_first_mapping_wins() {
        let config = Arc::new(directory_config());
        let directory = fixture();

        for (name, resolver) in resolvers(&config) {
            let mut session = directory.session();
            let grant = resolver.resolve(&mut session, "carol").await.unwrap();

            assert_eq!(grant.role, "engineer", "{name}");
        }
    }

    #[tokio::test]
    async fn test_unmapped_user() {
        let config = Arc::new(directory_config());
        let directory = fixture();

        for (name, resolver) in resolvers(&config) {
            let mut session = directory.session();
            let err = resolver.resolve(&mut session, "bob").await.unwrap_err();

            assert!(matches!(err, DirectoryError::Unmapped), "{name}: {err}");
        }
    }

    #[tokio::test]
    async fn test_filter_injection() {
        let config = Arc::new(directory_config());
        let directory = fixture();

        let mut session = directory.session();
        let err = DirectMembership::new(Arc::clone(&config))
            .resolve(&mut session, "admin)(uid=*")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::UnexpectedEntries(0)));

        let mut session = directory.session();
        let err = ChainedMatching::new(Arc::clone(&config))
            .resolve(&mut session, "admin)(uid=*")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Unmapped));

        assert!(
            directory
                .searches()
                .iter()
                .all(|filter| filter.contains(r"admin\29\28uid=\2a"))
        );
    }

    #[tokio::test]
    async fn test_nested_groups() {
        let config = Arc::new(directory_config());
        let directory = FakeDirectory::default()
            .with_user(FakeUser::new("dave", "pw").group("cn=backend,dc=x"))
            .with_nesting("cn=backend,dc=x", "cn=eng,dc=x");

        let mut session = directory.session();
        let grant = ChainedMatching::new(Arc::clone(&config))
            .resolve(&mut session, "dave")
            .await
            .unwrap();
        assert_eq!(grant.role, "engineer");

        let mut session = directory.session();
        let err = DirectMembership::new(config)
            .resolve(&mut session, "dave")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Unmapped));
    }

    #[tokio::test]
    async fn test_ambiguous_entries() {
        let config = Arc::new(directory_config());
        let directory = FakeDirectory::default()
            .with_user(FakeUser::new("erin", "pw").group("cn=eng,dc=x"))
            .with_user(FakeUser::new("erin", "other").group("cn=eng,dc=x"));

        for (name, resolver) in resolvers(&config) {
            let mut session = directory.session();
            let err = resolver.resolve(&mut session, "erin").await.unwrap_err();

            assert!(
                matches!(
                    err,
                    DirectoryError::UnexpectedEntries(2) | DirectoryError::Unmapped
                ),
                "{name}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_group_case_insensitive() {
        let config = Arc::new(directory_config());
        let directory = FakeDirectory::default()
            .with_user(FakeUser::new("frank", "pw").group("CN=Eng,DC=x"));

        let mut session = directory.session();
        let grant = DirectMembership::new(config)
            .resolve(&mut session, "frank")
            .await
            .unwrap();
        assert_eq!(grant.role, "engineer");
        assert_eq!(grant.display_name.as_deref(), Some("frank"));
    }
}
