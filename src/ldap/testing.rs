//! In-memory directory fixtures.
//!
//! Searches go through a small filter evaluator, so escaped and injected
//! values behave as they would on a server.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ldap3::LdapError;

use super::filter::MATCHING_RULE_IN_CHAIN;
use super::{Connector, DirectoryError, DirectorySession, Entry};
use crate::config::{AuthType, DirectoryConfig, GroupMapping};

/// Two mappings: `cn=eng,dc=x` to `engineer`, `cn=ops,dc=x` to `operator`.
pub(crate) fn directory_config() -> DirectoryConfig {
    DirectoryConfig {
        server: "ldap.test".into(),
        search_base: "dc=x".into(),
        group_map: vec![
            GroupMapping {
                ldap_group: "cn=eng,dc=x".into(),
                role: "engineer".into(),
            },
            GroupMapping {
                ldap_group: "cn=ops,dc=x".into(),
                role: "operator".into(),
            },
        ],
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeUser {
    uid: String,
    password: String,
    attrs: HashMap<String, Vec<String>>,
}

impl FakeUser {
    pub(crate) fn new(uid: &str, password: &str) -> Self {
        let attrs = HashMap::from([
            ("objectClass".to_owned(), vec!["top".to_owned(), "user".to_owned()]),
            ("uid".to_owned(), vec![uid.to_owned()]),
            ("cn".to_owned(), vec![uid.to_owned()]),
        ]);

        Self {
            uid: uid.into(),
            password: password.into(),
            attrs,
        }
    }

    pub(crate) fn name(mut self, name: &str) -> Self {
        self.attrs.insert("cn".into(), vec![name.into()]);
        self
    }

    pub(crate) fn group(mut self, dn: &str) -> Self {
        self.attrs
            .entry("memberOf".into())
            .or_default()
            .push(dn.into());
        self
    }

    fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Log {
    binds: Vec<(AuthType, String)>,
    searches: Vec<String>,
    connections: usize,
}

/// Directory held in memory; clones share the call log.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDirectory {
    users: Vec<FakeUser>,
    /// Group DN to its parent groups.
    nesting: HashMap<String, Vec<String>>,
    unreachable: bool,
    log: Arc<Mutex<Log>>,
}

impl FakeDirectory {
    pub(crate) fn with_user(mut self, user: FakeUser) -> Self {
        self.users.push(user);
        self
    }

    pub(crate) fn with_nesting(mut self, child: &str, parent: &str) -> Self {
        self.nesting
            .entry(child.to_lowercase())
            .or_default()
            .push(parent.into());
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub(crate) fn session(&self) -> FakeSession {
        FakeSession {
            directory: self.clone(),
        }
    }

    pub(crate) fn searches(&self) -> Vec<String> {
        self.log.lock().unwrap().searches.clone()
    }

    pub(crate) fn binds(&self) -> Vec<(AuthType, String)> {
        self.log.lock().unwrap().binds.clone()
    }

    pub(crate) fn connections(&self) -> usize {
        self.log.lock().unwrap().connections
    }

    fn member_of(&self, user: &FakeUser, attr: &str, group: &str) -> bool {
        let mut seen = HashSet::new();
        let mut pending: Vec<String> =
            user.values(attr).iter().map(|g| g.to_lowercase()).collect();

        while let Some(current) = pending.pop() {
            if current == group.to_lowercase() {
                return true;
            }
            if seen.insert(current.clone()) {
                if let Some(parents) = self.nesting.get(&current) {
                    pending.extend(parents.iter().map(|g| g.to_lowercase()));
                }
            }
        }
        false
    }

    fn matches(&self, user: &FakeUser, filter: &Filter) -> bool {
        match filter {
            Filter::And(items) => items.iter().all(|f| self.matches(user, f)),
            Filter::Or(items) => items.iter().any(|f| self.matches(user, f)),
            Filter::Present(attr) => !user.values(attr).is_empty(),
            Filter::Equal(attr, value) => user
                .values(attr)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::InChain(attr, group) => self.member_of(user, attr, group),
        }
    }
}

#[async_trait]
impl Connector for FakeDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        if self.unreachable {
            let err = io::Error::from(io::ErrorKind::ConnectionRefused);
            return Err(DirectoryError::Connect(LdapError::from(err)));
        }

        self.log.lock().unwrap().connections += 1;
        Ok(Box::new(self.session()))
    }
}

pub(crate) struct FakeSession {
    directory: FakeDirectory,
}

#[async_trait]
impl DirectorySession for FakeSession {
    async fn bind(
        &mut self,
        auth: AuthType,
        principal: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        self.directory
            .log
            .lock()
            .unwrap()
            .binds
            .push((auth, principal.to_owned()));

        let uid = principal.rsplit('\\').next().unwrap_or(principal);
        let granted = self
            .directory
            .users
            .iter()
            .any(|user| user.uid == uid && user.password == password);

        if granted {
            Ok(())
        } else {
            Err(DirectoryError::InvalidCredentials)
        }
    }

    async fn search(
        &mut self,
        _base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        self.directory
            .log
            .lock()
            .unwrap()
            .searches
            .push(filter.to_owned());

        let parsed = parse(filter).ok_or(DirectoryError::Search(LdapError::FilterParsing))?;

        Ok(self
            .directory
            .users
            .iter()
            .filter(|user| self.directory.matches(user, &parsed))
            .map(|user| Entry {
                dn: format!("uid={},dc=x", user.uid),
                attrs: attrs
                    .iter()
                    .filter(|attr| !user.values(attr).is_empty())
                    .map(|attr| (attr.to_string(), user.values(attr).to_vec()))
                    .collect(),
            })
            .collect())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Present(String),
    Equal(String, String),
    InChain(String, String),
}

fn parse(input: &str) -> Option<Filter> {
    let (filter, rest) = parse_item(input)?;
    rest.is_empty().then_some(filter)
}

fn parse_item(input: &str) -> Option<(Filter, &str)> {
    let input = input.strip_prefix('(')?;

    if let Some(op) = input.chars().next().filter(|c| *c == '&' || *c == '|') {
        let mut rest = &input[1..];
        let mut items = Vec::new();
        while rest.starts_with('(') {
            let (item, next) = parse_item(rest)?;
            items.push(item);
            rest = next;
        }
        let rest = rest.strip_prefix(')')?;
        let filter = if op == '&' {
            Filter::And(items)
        } else {
            Filter::Or(items)
        };
        return Some((filter, rest));
    }

    let end = input.find(')')?;
    let (item, rest) = (&input[..end], &input[end + 1..]);
    let (attr, value) = item.split_once('=')?;

    let filter = if let Some((attr, rule)) = attr.split_once(':') {
        if rule.strip_suffix(':')? != MATCHING_RULE_IN_CHAIN {
            return None;
        }
        Filter::InChain(attr.into(), unescape(value)?)
    } else if value == "*" {
        Filter::Present(attr.into())
    } else if value.contains(['*', '(']) {
        return None;
    } else {
        Filter::Equal(attr.into(), unescape(value)?)
    };

    Some((filter, rest))
}

fn unescape(value: &str) -> Option<String> {
    let mut out = Vec::with_capacity(value.len());
    let mut bytes = value.bytes();
    while let Some(b) = bytes.next() {
        if b == b'\\' {
            let hex = [bytes.next()?, bytes.next()?];
            let hex = std::str::from_utf8(&hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            out.push(b);
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_evaluator() {
        assert_eq!(
            parse(r"(&(objectclass=user)(uid=a\2ab))"),
            Some(Filter::And(vec![
                Filter::Equal("objectclass".into(), "user".into()),
                Filter::Equal("uid".into(), "a*b".into()),
            ]))
        );
        assert_eq!(
            parse("(&(uid=admin)(uid=*))"),
            Some(Filter::And(vec![
                Filter::Equal("uid".into(), "admin".into()),
                Filter::Present("uid".into()),
            ]))
        );
        assert_eq!(parse("(uid=a)(uid=b)"), None);
    }
}
