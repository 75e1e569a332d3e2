use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::user::{LocalUser, UserRepository};

/// In-memory [`UserRepository`] counting written rows. Existing rows are
/// left untouched, like `ON CONFLICT DO NOTHING`.
#[derive(Default)]
pub(crate) struct MemoryUserRepository {
    users: Mutex<HashMap<String, LocalUser>>,
    roles: Mutex<BTreeSet<(String, String)>>,
    inserts: Mutex<usize>,
}

impl MemoryUserRepository {
    pub(crate) fn with_user(self, user: LocalUser) -> Self {
        self.users.lock().unwrap().insert(user.login.clone(), user);
        self
    }

    pub(crate) fn user(&self, login: &str) -> Option<LocalUser> {
        self.users.lock().unwrap().get(login).cloned()
    }

    pub(crate) fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    /// `(role, login)` pairs.
    pub(crate) fn roles(&self) -> Vec<(String, String)> {
        self.roles.lock().unwrap().iter().cloned().collect()
    }

    /// Rows actually written.
    pub(crate) fn inserts(&self) -> usize {
        *self.inserts.lock().unwrap()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find(&self, login: &str) -> Result<Option<LocalUser>> {
        Ok(self.user(login))
    }

    async fn insert(&self, user: &LocalUser) -> Result<bool> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.login) {
            return Ok(false);
        }
        users.insert(user.login.clone(), user.clone());
        *self.inserts.lock().unwrap() += 1;
        Ok(true)
    }

    async fn has_role(&self, login: &str, role: &str) -> Result<bool> {
        Ok(self
            .roles
            .lock()
            .unwrap()
            .contains(&(role.to_owned(), login.to_owned())))
    }

    async fn assign_role(&self, login: &str, role: &str) -> Result<bool> {
        let created = self
            .roles
            .lock()
            .unwrap()
            .insert((role.to_owned(), login.to_owned()));
        if created {
            *self.inserts.lock().unwrap() += 1;
        }
        Ok(created)
    }
}
