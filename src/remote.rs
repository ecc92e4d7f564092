//! One authenticated session against one directory server.
//! A session binds to a single server address for its whole life; talking to
//! a different server means constructing a new session, so TLS settings and
//! referer headers stay consistent for one authority.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::TlsVerify;
use crate::error::AuthError;

const LOGIN_PATH: &str = "/ipa/session/login_password";
const RPC_PATH: &str = "/ipa/session/json";
const PROFILE_METHOD: &str = "user_show";

#[derive(Debug)]
pub enum LoginOutcome {
    /// HTTP 200: the session cookie is set and the profile was fetched.
    Success,
    /// Any other status: credentials rejected, no profile fetch attempted.
    Rejected(StatusCode),
}

#[derive(Debug)]
pub struct RemoteSession {
    server: String,
    base: String,
    client: reqwest::Client,
    username: Option<String>,
    profile: Option<Map<String, Value>>,
}

impl RemoteSession {
    /// Build a session bound to `server`. Bare hostnames become `https://`
    /// origins; a value already carrying a scheme is used verbatim.
    pub fn new(server: &str, tls: &TlsVerify, timeout: Duration) -> Result<Self, AuthError> {
        let base = if server.contains("://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("https://{server}")
        };
        let mut builder = reqwest::Client::builder().cookie_store(true).timeout(timeout);
        match tls {
            TlsVerify::Enabled => {}
            TlsVerify::Disabled => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            TlsVerify::CaBundle(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    AuthError::Config(format!("cannot read CA bundle {}: {e}", path.display()))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    AuthError::Config(format!("CA bundle {} is not valid PEM: {e}", path.display()))
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder
            .build()
            .map_err(|e| AuthError::Config(format!("http client build failed: {e}")))?;
        Ok(Self { server: server.to_string(), base, client, username: None, profile: None })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Username this session authenticated as, once `login` has succeeded.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Form-based session login. On HTTP 200 the full profile of `username`
    /// is fetched over the fresh session and retained; on any other status
    /// the rejection is reported without an error. Transport failures come
    /// back as `AuthError::Connection` so callers can tell "bad credentials"
    /// from "server unreachable".
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let login_url = format!("{}{}", self.base, LOGIN_PATH);
        debug!("form login for `{username}` on {login_url}");
        let response = self
            .client
            .post(&login_url)
            .headers(self.request_headers(&login_url, "text/plain")?)
            .form(&[("user", username), ("password", password)])
            .send()
            .await
            .map_err(|e| AuthError::Connection { server: self.server.clone(), source: e })?;

        let status = response.status();
        if status != StatusCode::OK {
            info!("directory {} rejected credentials for `{username}` (HTTP {})", self.server, status.as_u16());
            return Ok(LoginOutcome::Rejected(status));
        }

        info!("directory {} authenticated `{username}`", self.server);
        self.username = Some(username.to_string());
        let profile = self
            .call(PROFILE_METHOD, json!([username]), json!({"all": true, "raw": false}))
            .await?;
        match profile {
            Value::Object(map) => self.profile = Some(map),
            other => {
                return Err(AuthError::protocol(
                    self.server.clone(),
                    format!("profile payload is not an object: {other}"),
                ))
            }
        }
        Ok(LoginOutcome::Success)
    }

    /// Generic JSON-RPC call over the authenticated session cookie. Returns
    /// the `result.result` field of the response payload.
    pub async fn call(&self, method: &str, item: Value, params: Value) -> Result<Value, AuthError> {
        let rpc_url = format!("{}{}", self.base, RPC_PATH);
        let body = json!({"id": 0, "method": method, "params": [item, params]});
        debug!("making {method} request to {rpc_url}");
        let response = self
            .client
            .post(&rpc_url)
            .headers(self.request_headers(&rpc_url, "application/json")?)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Connection { server: self.server.clone(), source: e })?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AuthError::protocol(self.server.clone(), format!("body is not JSON: {e}")))?;
        payload
            .get("result")
            .and_then(|r| r.get("result"))
            .cloned()
            .ok_or_else(|| AuthError::protocol(self.server.clone(), "response has no result.result"))
    }

    /// All remote memberships of the authenticated user, direct and
    /// indirect, deduplicated. Empty when no profile was fetched.
    pub fn groups(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        if let Some(profile) = &self.profile {
            for field in ["memberof_group", "memberofindirect_group"] {
                if let Some(Value::Array(items)) = profile.get(field) {
                    out.extend(items.iter().filter_map(|v| v.as_str().map(String::from)));
                }
            }
        }
        out
    }

    pub fn profile(&self) -> Option<&Map<String, Value>> {
        self.profile.as_ref()
    }

    // Per-call header construction: headers are instance-local state, never
    // shared templates.
    fn request_headers(&self, url: &str, accept: &'static str) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        let referer = HeaderValue::from_str(url)
            .map_err(|_| AuthError::Config(format!("server address `{}` is not a valid header value", self.server)))?;
        headers.insert(REFERER, referer);
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn session(server: &str) -> RemoteSession {
        RemoteSession::new(server, &TlsVerify::Enabled, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn bare_hostname_gets_https_origin() {
        let s = session("ipa01.example.com");
        assert_eq!(s.base, "https://ipa01.example.com");
        // Explicit scheme is honored (lets tests target a plain-HTTP mock)
        let s = session("http://127.0.0.1:7878/");
        assert_eq!(s.base, "http://127.0.0.1:7878");
    }

    #[test]
    fn groups_union_direct_and_indirect() {
        let mut s = session("ipa01.example.com");
        assert!(s.groups().is_empty());

        let profile = json!({
            "memberof_group": ["eng", "ops"],
            "memberofindirect_group": ["ops", "all-hands"],
        });
        s.profile = profile.as_object().cloned();
        let groups = s.groups();
        assert_eq!(groups.len(), 3);
        assert!(groups.contains("eng") && groups.contains("ops") && groups.contains("all-hands"));
    }

    #[test]
    fn garbage_ca_bundle_is_a_config_error() {
        let mut pem = tempfile::NamedTempFile::new().unwrap();
        pem.write_all(b"not a certificate").unwrap();
        let tls = TlsVerify::CaBundle(pem.path().to_path_buf());
        let err = RemoteSession::new("ipa01.example.com", &tls, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)), "got {err}");

        let tls = TlsVerify::CaBundle("/no/such/bundle.pem".into());
        let err = RemoteSession::new("ipa01.example.com", &tls, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)), "got {err}");
    }
}
