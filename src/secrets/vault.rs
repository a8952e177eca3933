//! HashiCorp Vault backend over the HTTP API.
//!
//! Supports three forms:
//! - `{{vault.token_policy(p)}}` creates a 24h token for policy `p`
//! - `{{vault.path(p)}}` reads the whole KV v2 secret at `p`
//! - `{{vault.key(p/k)}}` reads field `k` of the KV v2 secret at `p`

use super::{ResolveContext, SecretReference, SecretResolver};
use crate::config::EnvProvider;
use crate::error::{StrataError, StrataResult};
use anyhow::{Context, anyhow, bail};
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{info, warn};

const DEFAULT_MOUNT_POINT: &str = "kv";
const TOKEN_TTL: &str = "24h";

/// Connection settings, read from the `VAULT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    pub addr: Option<String>,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub skip_verify: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub mount_point: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            addr: None,
            token: None,
            namespace: None,
            skip_verify: false,
            username: None,
            password: None,
            role: None,
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
        }
    }
}

impl VaultSettings {
    pub fn from_env(env: &dyn EnvProvider) -> Self {
        Self {
            addr: env.var("VAULT_ADDR"),
            token: env.var("VAULT_TOKEN"),
            namespace: env.var("VAULT_NAMESPACE"),
            skip_verify: env.var("VAULT_SKIP_VERIFY").is_some_and(|v| is_truthy(&v)),
            username: env.var("VAULT_USERNAME"),
            password: env.var("VAULT_PASSWORD"),
            role: env.var("VAULT_ROLE"),
            mount_point: env
                .var("VAULT_MOUNT_POINT")
                .unwrap_or_else(|| DEFAULT_MOUNT_POINT.to_string()),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "y" | "yes" | "t" | "true" | "on" | "1"
    )
}

pub struct VaultSecretResolver {
    settings: VaultSettings,
}

impl VaultSecretResolver {
    pub fn new(settings: VaultSettings) -> Self {
        Self { settings }
    }

    pub fn from_env(env: &dyn EnvProvider) -> Self {
        Self::new(VaultSettings::from_env(env))
    }

    fn connect(&self) -> anyhow::Result<VaultSession> {
        let addr = self
            .settings
            .addr
            .as_deref()
            .context("VAULT_ADDR is not set")?;

        info!(url = addr, namespace = ?self.settings.namespace, "Connecting to Vault");
        if self.settings.skip_verify {
            warn!(url = addr, "Using insecure Vault endpoint");
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(self.settings.skip_verify)
            .build()?;

        let mut session = VaultSession {
            client,
            base_url: addr.trim_end_matches('/').to_string(),
            token: self.settings.token.clone(),
            namespace: self.settings.namespace.clone(),
        };

        if !session.is_authenticated()? {
            info!("Vault not authenticated, trying LDAP fallback");
            session
                .ldap_login(
                    self.settings.username.as_deref(),
                    self.settings.password.as_deref(),
                )
                .context("Error authenticating Vault over LDAP")?;
            info!("Vault LDAP authenticated");
        }
        Ok(session)
    }

    fn create_token(&self, policy: &str) -> anyhow::Result<Value> {
        let session = self.connect()?;
        info!(policy, role = ?self.settings.role, "Generating Vault token");

        let path = match &self.settings.role {
            Some(role) => format!("auth/token/create/{}", role),
            None => "auth/token/create".to_string(),
        };
        let body = json!({"policies": [policy], "ttl": TOKEN_TTL});
        let response = session.send(session.request(Method::POST, &path).json(&body))?;

        response
            .pointer("/auth/client_token")
            .cloned()
            .ok_or_else(|| anyhow!("token response carries no auth.client_token"))
    }

    fn read_path(&self, path: &str) -> anyhow::Result<Value> {
        let session = self.connect()?;
        let api_path = format!("{}/data/{}", self.settings.mount_point, path.trim_start_matches('/'));
        let response = session.send(session.request(Method::GET, &api_path))?;

        response
            .pointer("/data/data")
            .cloned()
            .ok_or_else(|| anyhow!("secret {} carries no data", path))
    }

    fn read_key(&self, path: &str, key: &str) -> anyhow::Result<Value> {
        let data = self.read_path(path)?;
        data.get(key)
            .cloned()
            .ok_or_else(|| anyhow!("key '{}' not found in secret {}", key, path))
    }
}

impl SecretResolver for VaultSecretResolver {
    fn name(&self) -> &str {
        "vault"
    }

    fn supports(&self, secret_type: &str) -> bool {
        secret_type == "vault"
    }

    fn resolve(&self, reference: &SecretReference, _context: &ResolveContext) -> StrataResult<Value> {
        let params = &reference.params;
        let result = if let Some(policy) = params.get("token_policy") {
            self.create_token(policy)
        } else if let Some(path) = params.get("path") {
            self.read_path(path)
        } else if let Some(key_path) = params.get("key") {
            let (path, key) = split_key_path(key_path);
            self.read_key(path, key)
        } else {
            return Err(StrataError::missing_parameter("path", params));
        };

        result.map_err(|e| StrataError::backend(&reference.to_string(), format!("{:#}", e)))
    }
}

/// `a/b/c` -> (`a/b`, `c`)
fn split_key_path(key_path: &str) -> (&str, &str) {
    key_path.rsplit_once('/').unwrap_or(("", key_path))
}

struct VaultSession {
    client: Client,
    base_url: String,
    token: Option<String>,
    namespace: Option<String>,
}

impl VaultSession {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}/v1/{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.header("X-Vault-Token", token);
        }
        if let Some(namespace) = &self.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }
        request
    }

    fn send(&self, request: RequestBuilder) -> anyhow::Result<Value> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("Vault returned {}: {}", status, body.trim());
        }
        Ok(response.json::<Value>()?)
    }

    fn is_authenticated(&self) -> anyhow::Result<bool> {
        if self.token.is_none() {
            return Ok(false);
        }
        let response = self
            .request(Method::GET, "auth/token/lookup-self")
            .send()?;
        Ok(response.status().is_success())
    }

    fn ldap_login(&mut self, username: Option<&str>, password: Option<&str>) -> anyhow::Result<()> {
        let username = username.context("VAULT_USERNAME is not set")?;
        let password = password.context("VAULT_PASSWORD is not set")?;

        let path = format!("auth/ldap/login/{}", username);
        let response = self.send(self.request(Method::POST, &path).json(&json!({"password": password})))?;
        let token = response
            .pointer("/auth/client_token")
            .and_then(Value::as_str)
            .context("login response carries no auth.client_token")?;
        self.token = Some(token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use mockito::{Matcher, Mock, Server};
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_settings_from_env() {
        let settings = VaultSettings::from_env(&env(&[
            ("VAULT_ADDR", "https://vault.example.com"),
            ("VAULT_SKIP_VERIFY", "True"),
            ("VAULT_ROLE", "deployer"),
        ]));
        assert_eq!(settings.addr.as_deref(), Some("https://vault.example.com"));
        assert!(settings.skip_verify);
        assert_eq!(settings.role.as_deref(), Some("deployer"));
        assert_eq!(settings.mount_point, "kv");
    }

    #[test]
    fn test_skip_verify_defaults_off() {
        let settings = VaultSettings::from_env(&env(&[("VAULT_SKIP_VERIFY", "no")]));
        assert!(!settings.skip_verify);
        assert!(!VaultSettings::from_env(&env(&[])).skip_verify);
    }

    #[test]
    fn test_split_key_path() {
        assert_eq!(split_key_path("team/app/password"), ("team/app", "password"));
        assert_eq!(split_key_path("password"), ("", "password"));
    }

    #[test]
    fn test_missing_parameters_fail_before_connecting() {
        let resolver = VaultSecretResolver::new(VaultSettings::default());
        let reference = SecretReference::parse("vault.unknown(x)").unwrap();
        let err = resolver
            .resolve(&reference, &ResolveContext::default())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingParameter);
        assert_eq!(err.key.as_deref(), Some("path"));
    }

    #[test]
    fn test_unset_address_is_backend_failure() {
        let resolver = VaultSecretResolver::new(VaultSettings::default());
        let reference = SecretReference::parse("vault.path(team/app)").unwrap();
        let err = resolver
            .resolve(&reference, &ResolveContext::default())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BackendFailure);
        assert!(err.message.contains("VAULT_ADDR"));
    }

    fn settings(server: &Server, token: &str) -> VaultSettings {
        VaultSettings {
            addr: Some(server.url()),
            token: Some(token.to_string()),
            ..VaultSettings::default()
        }
    }

    fn resolve(resolver: &VaultSecretResolver, body: &str) -> StrataResult<Value> {
        let reference = SecretReference::parse(body).unwrap();
        resolver.resolve(&reference, &ResolveContext::default())
    }

    fn lookup_self(server: &mut Server, token: &str, status: usize) -> Mock {
        server
            .mock("GET", "/v1/auth/token/lookup-self")
            .match_header("x-vault-token", token)
            .with_status(status)
            .with_body(r#"{"data": {}}"#)
            .create()
    }

    fn team_app_secret(server: &mut Server, token: &str) -> Mock {
        server
            .mock("GET", "/v1/kv/data/team/app")
            .match_header("x-vault-token", token)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": {"data": {"user": "app", "password": "hunter2"}, "metadata": {"version": 3}}}"#,
            )
            .create()
    }

    #[test]
    fn test_path_reads_whole_secret() {
        let mut server = Server::new();
        let lookup = lookup_self(&mut server, "root", 200);
        let read = server
            .mock("GET", "/v1/secrets/data/team/app")
            .match_header("x-vault-token", "root")
            .match_header("x-vault-namespace", "platform")
            .with_status(200)
            .with_body(r#"{"data": {"data": {"user": "app", "password": "hunter2"}}}"#)
            .create();

        let resolver = VaultSecretResolver::new(VaultSettings {
            namespace: Some("platform".to_string()),
            mount_point: "secrets".to_string(),
            ..settings(&server, "root")
        });
        let value = resolve(&resolver, "vault.path(/team/app)").unwrap();

        assert_eq!(value, json!({"user": "app", "password": "hunter2"}));
        lookup.assert();
        read.assert();
    }

    #[test]
    fn test_key_reads_one_field() {
        let mut server = Server::new();
        let _lookup = lookup_self(&mut server, "root", 200);
        let read = team_app_secret(&mut server, "root");

        let resolver = VaultSecretResolver::new(settings(&server, "root"));
        let value = resolve(&resolver, "vault.key(team/app/password)").unwrap();

        assert_eq!(value, json!("hunter2"));
        read.assert();
    }

    #[test]
    fn test_missing_field_is_backend_failure() {
        let mut server = Server::new();
        let _lookup = lookup_self(&mut server, "root", 200);
        let _read = team_app_secret(&mut server, "root");

        let resolver = VaultSecretResolver::new(settings(&server, "root"));
        let err = resolve(&resolver, "vault.key(team/app/api_key)").unwrap_err();

        assert_eq!(err.code, ErrorCode::BackendFailure);
        assert!(err.message.contains("api_key"));
    }

    #[test]
    fn test_token_policy_creates_token_under_role() {
        let mut server = Server::new();
        let _lookup = lookup_self(&mut server, "root", 200);
        let create = server
            .mock("POST", "/v1/auth/token/create/deployer")
            .match_header("x-vault-token", "root")
            .match_body(Matcher::Json(json!({"policies": ["deploy"], "ttl": "24h"})))
            .with_status(200)
            .with_body(r#"{"auth": {"client_token": "s.child", "lease_duration": 86400}}"#)
            .create();

        let resolver = VaultSecretResolver::new(VaultSettings {
            role: Some("deployer".to_string()),
            ..settings(&server, "root")
        });
        let value = resolve(&resolver, "vault.token_policy(deploy)").unwrap();

        assert_eq!(value, json!("s.child"));
        create.assert();
    }

    #[test]
    fn test_token_policy_without_role() {
        let mut server = Server::new();
        let _lookup = lookup_self(&mut server, "root", 200);
        let create = server
            .mock("POST", "/v1/auth/token/create")
            .match_body(Matcher::PartialJson(json!({"policies": ["read-only"]})))
            .with_status(200)
            .with_body(r#"{"auth": {"client_token": "s.plain"}}"#)
            .create();

        let resolver = VaultSecretResolver::new(settings(&server, "root"));
        let value = resolve(&resolver, "vault.token_policy(read-only)").unwrap();

        assert_eq!(value, json!("s.plain"));
        create.assert();
    }

    #[test]
    fn test_rejected_token_falls_back_to_ldap() {
        let mut server = Server::new();
        let lookup = lookup_self(&mut server, "stale", 403);
        let login = server
            .mock("POST", "/v1/auth/ldap/login/alice")
            .match_body(Matcher::Json(json!({"password": "s3cret"})))
            .with_status(200)
            .with_body(r#"{"auth": {"client_token": "s.ldap"}}"#)
            .create();
        let read = team_app_secret(&mut server, "s.ldap");

        let resolver = VaultSecretResolver::new(VaultSettings {
            username: Some("alice".to_string()),
            password: Some("s3cret".to_string()),
            ..settings(&server, "stale")
        });
        let value = resolve(&resolver, "vault.key(team/app/user)").unwrap();

        assert_eq!(value, json!("app"));
        lookup.assert();
        login.assert();
        read.assert();
    }

    #[test]
    fn test_ldap_fallback_needs_credentials() {
        let mut server = Server::new();
        let _lookup = lookup_self(&mut server, "stale", 403);

        let resolver = VaultSecretResolver::new(settings(&server, "stale"));
        let err = resolve(&resolver, "vault.path(team/app)").unwrap_err();

        assert_eq!(err.code, ErrorCode::BackendFailure);
        assert!(err.message.contains("VAULT_USERNAME"));
    }

    #[test]
    fn test_error_status_names_reference() {
        let mut server = Server::new();
        let _lookup = lookup_self(&mut server, "root", 200);
        let _read = server
            .mock("GET", "/v1/kv/data/team/missing")
            .with_status(404)
            .with_body(r#"{"errors": []}"#)
            .create();

        let resolver = VaultSecretResolver::new(settings(&server, "root"));
        let err = resolve(&resolver, "vault.path(team/missing)").unwrap_err();

        assert_eq!(err.code, ErrorCode::BackendFailure);
        assert!(err.message.contains("vault.path(team/missing)"));
        assert!(err.message.contains("404"));
    }
}
