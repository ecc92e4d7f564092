//! Backend configuration, resolved once per authentication attempt from
//! `FREEIPA_AUTH_*` environment variables with explicit defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::AuthError;

pub const ENV_PREFIX: &str = "FREEIPA_AUTH_";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// TLS verification mode for the directory session.
/// `CaBundle` points at a PEM bundle used for the server handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerify {
    #[default]
    Enabled,
    Disabled,
    CaBundle(PathBuf),
}

impl TlsVerify {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "true" | "True" | "1" => TlsVerify::Enabled,
            "false" | "False" | "0" => TlsVerify::Disabled,
            path => TlsVerify::CaBundle(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub enabled: bool,
    pub server: Option<String>,
    pub failover_server: Option<String>,
    pub tls_verify: TlsVerify,
    /// Bound on every HTTP call (login and RPC); requests never block forever.
    pub timeout: Duration,
    /// When false, only identities carrying a group from `user_flags_by_group`
    /// are allowed through the authorization gate.
    pub authorize_all_users: bool,
    /// Boolean flag name -> remote groups that switch it on.
    pub user_flags_by_group: BTreeMap<String, BTreeSet<String>>,
    /// Local attribute name -> remote profile field it is copied from.
    pub user_attrs_map: BTreeMap<String, String>,
    pub update_user_groups: bool,
    pub update_user_permissions_by_group: bool,
    pub always_update_user: bool,
    /// Remote group names qualify as local group candidates only when they
    /// carry this prefix; the prefix is stripped from the candidate name.
    pub require_group_prefix: Option<String>,
    pub require_permission_prefix: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let mut user_attrs_map = BTreeMap::new();
        user_attrs_map.insert("first_name".to_string(), "givenname".to_string());
        user_attrs_map.insert("last_name".to_string(), "sn".to_string());
        user_attrs_map.insert("email".to_string(), "mail".to_string());
        Self {
            enabled: true,
            server: None,
            failover_server: None,
            tls_verify: TlsVerify::Enabled,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            authorize_all_users: true,
            user_flags_by_group: BTreeMap::new(),
            user_attrs_map,
            update_user_groups: false,
            update_user_permissions_by_group: false,
            always_update_user: true,
            require_group_prefix: None,
            require_permission_prefix: None,
        }
    }
}

impl BackendConfig {
    /// Resolve configuration from process environment variables.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup. Absent keys fall
    /// back to defaults; present-but-malformed values are configuration
    /// errors, never silently defaulted.
    pub fn from_lookup<F>(get: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| get(&format!("{ENV_PREFIX}{suffix}"));
        let defaults = Self::default();

        let config = Self {
            enabled: parse_bool("ENABLED", get("ENABLED"), defaults.enabled)?,
            server: get("SERVER").filter(|s| !s.is_empty()),
            failover_server: get("FAILOVER_SERVER").filter(|s| !s.is_empty()),
            tls_verify: get("SSL_VERIFY")
                .map(|raw| TlsVerify::parse(&raw))
                .unwrap_or(defaults.tls_verify),
            timeout: match get("TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|_| {
                    AuthError::Config(format!("{ENV_PREFIX}TIMEOUT_SECS is not an integer: `{raw}`"))
                })?),
                None => defaults.timeout,
            },
            authorize_all_users: parse_bool(
                "AUTHORIZE_ALL_USERS",
                get("AUTHORIZE_ALL_USERS"),
                defaults.authorize_all_users,
            )?,
            user_flags_by_group: parse_json("USER_FLAGS_BY_GROUP", get("USER_FLAGS_BY_GROUP"))?
                .unwrap_or(defaults.user_flags_by_group),
            user_attrs_map: parse_json("USER_ATTRS_MAP", get("USER_ATTRS_MAP"))?
                .unwrap_or(defaults.user_attrs_map),
            update_user_groups: parse_bool(
                "UPDATE_USER_GROUPS",
                get("UPDATE_USER_GROUPS"),
                defaults.update_user_groups,
            )?,
            update_user_permissions_by_group: parse_bool(
                "UPDATE_USER_PERMISSIONS_BY_GROUP",
                get("UPDATE_USER_PERMISSIONS_BY_GROUP"),
                defaults.update_user_permissions_by_group,
            )?,
            always_update_user: parse_bool(
                "ALWAYS_UPDATE_USER",
                get("ALWAYS_UPDATE_USER"),
                defaults.always_update_user,
            )?,
            require_group_prefix: get("REQUIRE_GROUP_PREFIX").filter(|s| !s.is_empty()),
            require_permission_prefix: get("REQUIRE_PERMISSION_PREFIX").filter(|s| !s.is_empty()),
        };

        if config.enabled && config.server.is_some() && config.failover_server.is_none() {
            warn!("directory backend has a primary server but no failover server configured");
        }
        Ok(config)
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> Result<bool, AuthError> {
    match raw {
        None => Ok(default),
        Some(raw) => match raw.trim() {
            "true" | "True" | "1" => Ok(true),
            "false" | "False" | "0" => Ok(false),
            other => Err(AuthError::Config(format!(
                "{ENV_PREFIX}{key} is not a boolean: `{other}`"
            ))),
        },
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    key: &str,
    raw: Option<String>,
) -> Result<Option<T>, AuthError> {
    match raw {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            AuthError::Config(format!("{ENV_PREFIX}{key} is not valid JSON: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_shipped_settings() {
        let config = BackendConfig::from_lookup(|_| None).unwrap();
        assert!(config.enabled);
        assert!(config.server.is_none());
        assert_eq!(config.tls_verify, TlsVerify::Enabled);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.authorize_all_users);
        assert!(config.user_flags_by_group.is_empty());
        assert_eq!(config.user_attrs_map.get("first_name").unwrap(), "givenname");
        assert_eq!(config.user_attrs_map.get("last_name").unwrap(), "sn");
        assert_eq!(config.user_attrs_map.get("email").unwrap(), "mail");
        assert!(!config.update_user_groups);
        assert!(!config.update_user_permissions_by_group);
        assert!(config.always_update_user);
    }

    #[test]
    fn full_lookup_round_trip() {
        let vars = [
            ("ENABLED", "true"),
            ("SERVER", "ipa01.example.com"),
            ("FAILOVER_SERVER", "ipa02.example.com"),
            ("SSL_VERIFY", "/etc/ipa/ca.crt"),
            ("TIMEOUT_SECS", "5"),
            ("AUTHORIZE_ALL_USERS", "false"),
            ("USER_FLAGS_BY_GROUP", r#"{"is_staff": ["eng"], "is_superuser": ["ops"]}"#),
            ("USER_ATTRS_MAP", r#"{"email": "mail"}"#),
            ("UPDATE_USER_GROUPS", "true"),
            ("UPDATE_USER_PERMISSIONS_BY_GROUP", "true"),
            ("ALWAYS_UPDATE_USER", "false"),
            ("REQUIRE_GROUP_PREFIX", "app.group."),
            ("REQUIRE_PERMISSION_PREFIX", "app.perm."),
        ];
        let config = BackendConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.server.as_deref(), Some("ipa01.example.com"));
        assert_eq!(config.failover_server.as_deref(), Some("ipa02.example.com"));
        assert_eq!(config.tls_verify, TlsVerify::CaBundle(PathBuf::from("/etc/ipa/ca.crt")));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.authorize_all_users);
        assert_eq!(
            config.user_flags_by_group.get("is_staff"),
            Some(&BTreeSet::from(["eng".to_string()]))
        );
        assert_eq!(config.user_attrs_map.len(), 1);
        assert!(config.update_user_groups);
        assert!(config.update_user_permissions_by_group);
        assert!(!config.always_update_user);
        assert_eq!(config.require_group_prefix.as_deref(), Some("app.group."));
        assert_eq!(config.require_permission_prefix.as_deref(), Some("app.perm."));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = BackendConfig::from_lookup(lookup(&[("ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)), "got {err}");

        let err = BackendConfig::from_lookup(lookup(&[("USER_ATTRS_MAP", "not json")])).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)), "got {err}");

        let err = BackendConfig::from_lookup(lookup(&[("TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)), "got {err}");
    }

    #[test]
    fn tls_verify_modes() {
        assert_eq!(TlsVerify::parse("true"), TlsVerify::Enabled);
        assert_eq!(TlsVerify::parse("false"), TlsVerify::Disabled);
        assert_eq!(TlsVerify::parse("/path/to/ssl"), TlsVerify::CaBundle(PathBuf::from("/path/to/ssl")));
    }
}
