//! Authentication orchestration: the bounded primary-then-failover attempt
//! sequence, the authorization gate, and the reconciliation hand-off.

use std::collections::HashSet;

use tracing::{error, info};

use crate::config::BackendConfig;
use crate::error::AuthError;
use crate::reconcile::Reconciler;
use crate::remote::{LoginOutcome, RemoteSession};
use crate::store::{LocalUser, UserStore};

pub struct FreeIpaBackend {
    config: BackendConfig,
}

impl FreeIpaBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Result<Self, AuthError> {
        Ok(Self::new(BackendConfig::from_env()?))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// One authentication attempt against the directory. `Ok(None)` covers
    /// "no opinion" (backend disabled), credential rejection and
    /// authorization denial; the caller cannot tell those apart and is not
    /// meant to. Errors are reserved for connectivity, configuration and
    /// store failures.
    pub async fn authenticate<S: UserStore>(
        &self,
        store: &S,
        username: &str,
        password: &str,
    ) -> Result<Option<LocalUser>, AuthError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let primary = self.config.server.as_deref().ok_or_else(|| {
            AuthError::Config("backend is enabled but no directory server is configured".into())
        })?;

        // Attempt #1 targets the primary. A connectivity failure falls over
        // to the configured failover server exactly once, with the same
        // credentials; the failover's own connectivity failure propagates.
        info!("attempting to authenticate `{username}` on directory server {primary}");
        let mut session = self.session(primary)?;
        let outcome = match session.login(username, password).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_connectivity() => {
                let Some(failover) = self.config.failover_server.as_deref() else {
                    return Err(err);
                };
                error!("primary directory server {primary} unreachable; retrying on {failover}");
                session = self.session(failover)?;
                session.login(username, password).await?
            }
            Err(err) => return Err(err),
        };

        match outcome {
            LoginOutcome::Rejected(_) => Ok(None),
            LoginOutcome::Success => {
                let groups = session.groups();
                if !self.authorized(&groups) {
                    info!(
                        "`{username}` authenticated on {} but holds no authorizing group",
                        session.server()
                    );
                    return Ok(None);
                }
                let profile = session.profile().cloned().unwrap_or_default();
                let user =
                    Reconciler::new(&self.config).reconcile(store, username, &groups, &profile)?;
                Ok(Some(user))
            }
        }
    }

    fn session(&self, server: &str) -> Result<RemoteSession, AuthError> {
        RemoteSession::new(server, &self.config.tls_verify, self.config.timeout)
    }

    // Valid directory credentials never imply local entitlement unless
    // configuration says everyone is authorized or a mapped group matches.
    fn authorized(&self, remote_groups: &HashSet<String>) -> bool {
        if self.config.authorize_all_users {
            return true;
        }
        self.config
            .user_flags_by_group
            .values()
            .any(|groups| groups.iter().any(|g| remote_groups.contains(g)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn gated_backend() -> FreeIpaBackend {
        let config = BackendConfig {
            authorize_all_users: false,
            user_flags_by_group: BTreeMap::from([
                ("is_staff".to_string(), BTreeSet::from(["eng".to_string()])),
                ("is_superuser".to_string(), BTreeSet::from(["ops".to_string()])),
            ]),
            ..BackendConfig::default()
        };
        FreeIpaBackend::new(config)
    }

    fn group_set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn gate_requires_a_mapped_group() {
        let backend = gated_backend();
        assert!(backend.authorized(&group_set(&["eng"])));
        assert!(backend.authorized(&group_set(&["sales", "ops"])));
        assert!(!backend.authorized(&group_set(&["sales"])));
        assert!(!backend.authorized(&group_set(&[])));
    }

    #[test]
    fn gate_open_when_all_users_authorized() {
        let backend = FreeIpaBackend::new(BackendConfig::default());
        assert!(backend.authorized(&group_set(&[])));
    }
}
