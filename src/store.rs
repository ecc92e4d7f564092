//! Local identity store boundary: the record this backend materializes and
//! the persistence trait an embedding application implements over its own
//! user database. `MemoryUserStore` is the in-process reference
//! implementation used by the test suite.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::tprintln;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocalUser {
    pub username: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub groups: HashSet<String>,
    #[serde(default)]
    pub permissions: HashSet<String>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    /// PHC-format hash. Never serialized out of the record.
    #[serde(skip)]
    pub password_hash: String,
}

impl LocalUser {
    pub fn new(username: &str) -> Self {
        Self { username: username.to_string(), ..Self::default() }
    }

    /// Boolean flag value; unset flags read as false.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}

/// Persistence primitives the reconciler needs from the application's user
/// store. Group and permission names that do not exist locally are ignored,
/// never created.
pub trait UserStore: Send + Sync {
    /// Lookup-or-create by username; the flag reports whether the record was
    /// created by this call.
    fn get_or_create(&self, username: &str) -> Result<(LocalUser, bool), StoreError>;

    /// Resolve candidate group names to the subset that exists locally.
    fn known_groups(&self, names: &HashSet<String>) -> Result<HashSet<String>, StoreError>;

    /// Resolve candidate permission codenames to the subset that exists locally.
    fn known_permissions(&self, codenames: &HashSet<String>) -> Result<HashSet<String>, StoreError>;

    /// Persist the full record as a single update.
    fn save(&self, user: &LocalUser) -> Result<(), StoreError>;
}

/// In-memory store. Each instance owns its own state; nothing is shared
/// across instances or behind globals.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, LocalUser>>,
    groups: RwLock<HashSet<String>>,
    permissions: RwLock<HashSet<String>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local group; only registered groups can gain members.
    pub fn add_group(&self, name: &str) {
        self.groups.write().insert(name.to_string());
    }

    /// Register a local permission codename.
    pub fn add_permission(&self, codename: &str) {
        self.permissions.write().insert(codename.to_string());
    }

    pub fn user(&self, username: &str) -> Option<LocalUser> {
        self.users.read().get(username).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}

impl UserStore for MemoryUserStore {
    fn get_or_create(&self, username: &str) -> Result<(LocalUser, bool), StoreError> {
        let mut users = self.users.write();
        if let Some(user) = users.get(username) {
            return Ok((user.clone(), false));
        }
        let user = LocalUser::new(username);
        users.insert(username.to_string(), user.clone());
        Ok((user, true))
    }

    fn known_groups(&self, names: &HashSet<String>) -> Result<HashSet<String>, StoreError> {
        let groups = self.groups.read();
        Ok(names.iter().filter(|n| groups.contains(*n)).cloned().collect())
    }

    fn known_permissions(&self, codenames: &HashSet<String>) -> Result<HashSet<String>, StoreError> {
        let permissions = self.permissions.read();
        Ok(codenames.iter().filter(|n| permissions.contains(*n)).cloned().collect())
    }

    fn save(&self, user: &LocalUser) -> Result<(), StoreError> {
        tprintln!("store.save user={}", user.username);
        self.users.write().insert(user.username.clone(), user.clone());
        Ok(())
    }
}
