//! Per-user index of identifiable items (workers, web consoles).

use std::collections::{BTreeMap, HashMap};

use srs_core::types::UserId;

/// Maps each user to the items they own, keyed by item id.
///
/// Item ids are unique across users. A user with no items left is
/// dropped, so [`contains_user`](Self::contains_user) means "owns at
/// least one item". Not synchronized; owners wrap it in a lock.
#[derive(Debug, Clone)]
pub struct UserDirectory<T> {
    users: HashMap<UserId, BTreeMap<String, T>>,
}

impl<T> Default for UserDirectory<T> {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
        }
    }
}

impl<T: Clone> UserDirectory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an item of `user_id`.
    pub fn add(&mut self, user_id: &str, id: &str, data: T) {
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    /// Items of `user_id`, ordered by id. Unknown users own nothing.
    pub fn list(&self, user_id: &str) -> Vec<T> {
        self.users
            .get(user_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn list_users(&self) -> Vec<UserId> {
        self.users.keys().cloned().collect()
    }

    /// `(user, item id)` pairs across every user.
    pub fn entries(&self) -> Vec<(UserId, String)> {
        self.users
            .iter()
            .flat_map(|(user, items)| items.keys().map(move |id| (user.clone(), id.clone())))
            .collect()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn contains(&self, user_id: &str, id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|items| items.contains_key(id))
    }

    /// Owner of item `id`.
    pub fn get_user(&self, id: &str) -> Option<UserId> {
        if id.is_empty() {
            return None;
        }
        self.users
            .iter()
            .find(|(_, items)| items.contains_key(id))
            .map(|(user, _)| user.clone())
    }

    pub fn get_data(&self, user_id: &str, id: &str) -> Option<T> {
        self.users.get(user_id)?.get(id).cloned()
    }

    pub fn get_data_mut(&mut self, user_id: &str, id: &str) -> Option<&mut T> {
        self.users.get_mut(user_id)?.get_mut(id)
    }

    pub fn remove_user(&mut self, user_id: &str) {
        self.users.remove(user_id);
    }

    /// Remove one item and return it. Drops the user once empty.
    pub fn remove_data(&mut self, user_id: &str, id: &str) -> Option<T> {
        let items = self.users.get_mut(user_id)?;
        let removed = items.remove(id);
        if items.is_empty() {
            self.users.remove(user_id);
        }
        removed
    }

    /// Total number of items across users.
    pub fn len(&self) -> usize {
        self.users.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
