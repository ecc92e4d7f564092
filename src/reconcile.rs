//! Reconciliation of a remote identity snapshot onto the local store.
//! The update is a pure function of the current snapshot: grants absent from
//! the snapshot are revoked, never kept. Running it twice with the same
//! input leaves the record unchanged.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::AuthError;
use crate::password;
use crate::store::{LocalUser, UserStore};

/// Flag forced on for every identity synchronized through this backend.
const STAFF_FLAG: &str = "is_staff";

pub struct Reconciler<'a> {
    config: &'a BackendConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a BackendConfig) -> Self {
        Self { config }
    }

    /// Materialize or update the local identity for `username` from the
    /// remote group set and profile data, then persist it as one update.
    pub fn reconcile<S: UserStore>(
        &self,
        store: &S,
        username: &str,
        remote_groups: &HashSet<String>,
        profile: &Map<String, Value>,
    ) -> Result<LocalUser, AuthError> {
        let (mut user, created) = store.get_or_create(username)?;

        // Reset on every call, including ones that skip the rest of the
        // update: a synced identity never authenticates through a local
        // password check.
        user.password_hash = password::unusable_password()?;

        if !created && !self.config.always_update_user {
            debug!("`{username}` exists and always_update_user is off; password reset only");
            store.save(&user)?;
            return Ok(user);
        }

        self.sync_attrs(&mut user, profile)?;

        let group_candidates =
            candidates(remote_groups, self.config.require_group_prefix.as_deref());
        let permission_candidates =
            candidates(remote_groups, self.config.require_permission_prefix.as_deref());

        for (flag, trigger_groups) in &self.config.user_flags_by_group {
            let on = trigger_groups.iter().any(|g| group_candidates.contains(g));
            user.flags.insert(flag.clone(), on);
        }
        // Synced identities are operationally privileged staff; elevated
        // status is only reachable through an explicit flag mapping above.
        user.flags.insert(STAFF_FLAG.to_string(), true);

        if self.config.update_user_groups {
            // Membership becomes exactly the candidates that resolve to
            // existing local groups; everything else is revoked. Unknown
            // names are never auto-created.
            user.groups = store.known_groups(&group_candidates)?;
        }
        if self.config.update_user_permissions_by_group {
            user.permissions = store.known_permissions(&permission_candidates)?;
        }

        debug!(
            "reconciled `{username}`: {} groups, {} permissions",
            user.groups.len(),
            user.permissions.len()
        );
        store.save(&user)?;
        Ok(user)
    }

    fn sync_attrs(&self, user: &mut LocalUser, profile: &Map<String, Value>) -> Result<(), AuthError> {
        for (local_attr, remote_field) in &self.config.user_attrs_map {
            let missing = || AuthError::MissingProfileField {
                username: user.username.clone(),
                field: remote_field.clone(),
            };
            let value = profile.get(remote_field).ok_or_else(missing)?;
            let scalar = scalar_of(value).ok_or_else(missing)?;
            user.attrs.insert(local_attr.clone(), scalar);
        }
        Ok(())
    }
}

// List-valued profile fields carry their usable value last.
fn scalar_of(value: &Value) -> Option<String> {
    let scalar = match value {
        Value::Array(items) => items.last()?,
        other => other,
    };
    match scalar {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Candidate local names for a remote group set: names carrying the prefix,
/// stripped through it. Without a prefix the whole remote set qualifies.
fn candidates(remote_groups: &HashSet<String>, prefix: Option<&str>) -> HashSet<String> {
    match prefix {
        None => remote_groups.clone(),
        Some(prefix) => remote_groups
            .iter()
            .filter_map(|g| g.split_once(prefix).map(|(_, rest)| rest.to_string()))
            .collect(),
    }
}
