//! Provider configuration.
//!
//! The provider block accepts the Admin API location and credentials. Every
//! field falls back to an environment variable when it is absent from the
//! block, so CI pipelines can configure the provider without touching code:
//!
//! | attribute              | environment variable    |
//! |------------------------|-------------------------|
//! | `kong_admin_uri`       | `KONG_ADMIN_ADDR`       |
//! | `kong_admin_username`  | `KONG_ADMIN_USERNAME`   |
//! | `kong_admin_password`  | `KONG_ADMIN_PASSWORD`   |
//! | `tls_skip_verify`      | `TLS_SKIP_VERIFY`       |
//! | `kong_api_key`         | `KONG_API_KEY`          |
//! | `kong_admin_token`     | `KONG_ADMIN_TOKEN`      |
//! | `kong_workspace`       | `KONG_WORKSPACE`        |
//! | `strict_plugins_match` | `STRICT_PLUGINS_MATCH`  |

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

/// Admin URI used when neither the block nor the environment sets one.
pub const DEFAULT_ADMIN_URI: &str = "http://localhost:8001";

/// The provider block as written by the user. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderBlock {
    kong_admin_uri: Option<String>,
    kong_admin_username: Option<String>,
    kong_admin_password: Option<String>,
    tls_skip_verify: Option<bool>,
    kong_api_key: Option<String>,
    kong_admin_token: Option<String>,
    kong_workspace: Option<String>,
    strict_plugins_match: Option<bool>,
}

/// Resolved provider configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct KongConfig {
    /// Base URI of the Kong Admin API.
    pub admin_uri: String,
    /// Username for HTTP basic auth in front of the Admin API.
    pub admin_username: Option<String>,
    /// Password for HTTP basic auth.
    pub admin_password: Option<String>,
    /// Accept invalid TLS certificates from the Admin API.
    pub tls_skip_verify: bool,
    /// Key sent as the `apikey` header (key-auth protected Admin API).
    pub api_key: Option<String>,
    /// Token sent as the `Kong-Admin-Token` header (Kong Enterprise RBAC).
    pub admin_token: Option<String>,
    /// Workspace prefixed to every entity path (Kong Enterprise).
    pub workspace: Option<String>,
    /// Keep Kong-filled plugin defaults in `config_json` instead of
    /// reducing it to the keys the user wrote.
    pub strict_plugins_match: bool,
}

impl Default for KongConfig {
    fn default() -> Self {
        Self {
            admin_uri: DEFAULT_ADMIN_URI.to_string(),
            admin_username: None,
            admin_password: None,
            tls_skip_verify: false,
            api_key: None,
            admin_token: None,
            workspace: None,
            strict_plugins_match: false,
        }
    }
}

impl std::fmt::Debug for KongConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "<redacted>")
        }

        f.debug_struct("KongConfig")
            .field("admin_uri", &self.admin_uri)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &redact(&self.admin_password))
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("api_key", &redact(&self.api_key))
            .field("admin_token", &redact(&self.admin_token))
            .field("workspace", &self.workspace)
            .field("strict_plugins_match", &self.strict_plugins_match)
            .finish()
    }
}

impl KongConfig {
    /// Resolve the configuration from a provider block, falling back to the
    /// process environment.
    pub fn from_provider_config(config: &Value) -> Result<Self, ProviderError> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve the configuration with a custom environment lookup.
    pub fn resolve<F>(config: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let block: ProviderBlock = match config {
            Value::Null => ProviderBlock::default(),
            other => serde_json::from_value(strip_nulls(other.clone())).map_err(|e| {
                ProviderError::Configuration(format!("invalid provider block: {}", e))
            })?,
        };

        let string_or_env = |value: Option<String>, var: &str| -> Option<String> {
            value
                .or_else(|| env(var))
                .filter(|s| !s.trim().is_empty())
        };
        let bool_or_env = |value: Option<bool>, var: &str| -> Result<bool, ProviderError> {
            match value {
                Some(b) => Ok(b),
                None => match env(var) {
                    Some(raw) => parse_bool(&raw).ok_or_else(|| {
                        ProviderError::Configuration(format!(
                            "{} must be a boolean, got '{}'",
                            var, raw
                        ))
                    }),
                    None => Ok(false),
                },
            }
        };

        let admin_uri = string_or_env(block.kong_admin_uri, "KONG_ADMIN_ADDR")
            .unwrap_or_else(|| DEFAULT_ADMIN_URI.to_string());
        let parsed = url::Url::parse(&admin_uri).map_err(|e| {
            ProviderError::Configuration(format!("invalid kong_admin_uri '{}': {}", admin_uri, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::Configuration(format!(
                "kong_admin_uri must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            admin_uri: admin_uri.trim_end_matches('/').to_string(),
            admin_username: string_or_env(block.kong_admin_username, "KONG_ADMIN_USERNAME"),
            admin_password: string_or_env(block.kong_admin_password, "KONG_ADMIN_PASSWORD"),
            tls_skip_verify: bool_or_env(block.tls_skip_verify, "TLS_SKIP_VERIFY")?,
            api_key: string_or_env(block.kong_api_key, "KONG_API_KEY"),
            admin_token: string_or_env(block.kong_admin_token, "KONG_ADMIN_TOKEN"),
            workspace: string_or_env(block.kong_workspace, "KONG_WORKSPACE"),
            strict_plugins_match: bool_or_env(block.strict_plugins_match, "STRICT_PLUGINS_MATCH")?,
        })
    }

    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "kong_admin_uri",
                Attribute::optional_string()
                    .with_description("The address of the Kong Admin API (env KONG_ADMIN_ADDR)"),
            )
            .with_attribute(
                "kong_admin_username",
                Attribute::optional_string()
                    .with_description("Basic auth username in front of the Admin API"),
            )
            .with_attribute(
                "kong_admin_password",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Basic auth password in front of the Admin API"),
            )
            .with_attribute(
                "tls_skip_verify",
                Attribute::optional_bool()
                    .with_description("Skip TLS certificate verification of the Admin API"),
            )
            .with_attribute(
                "kong_api_key",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("API key for a key-auth protected Admin API"),
            )
            .with_attribute(
                "kong_admin_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("RBAC token sent as Kong-Admin-Token"),
            )
            .with_attribute(
                "kong_workspace",
                Attribute::optional_string()
                    .with_description("Workspace to manage entities in (Kong Enterprise)"),
            )
            .with_attribute(
                "strict_plugins_match",
                Attribute::optional_bool().with_description(
                    "Compare plugin config_json with the full configuration returned by Kong",
                ),
            )
    }

    /// Non-fatal observations about a resolved configuration.
    pub fn warnings(&self) -> Vec<Diagnostic> {
        let mut warnings = Vec::new();
        if self.admin_username.is_some() != self.admin_password.is_some() {
            warnings.push(
                Diagnostic::warning("Incomplete basic auth credentials")
                    .with_detail(
                        "Both kong_admin_username and kong_admin_password are needed for basic auth",
                    )
                    .with_attribute(if self.admin_username.is_some() {
                        "kong_admin_password"
                    } else {
                        "kong_admin_username"
                    }),
            );
        }
        if self.tls_skip_verify && self.admin_uri.starts_with("http://") {
            warnings.push(
                Diagnostic::warning("tls_skip_verify has no effect on a plain http admin URI")
                    .with_attribute("tls_skip_verify"),
            );
        }
        warnings
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

// Hosts send every schema attribute, unset ones as null.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}
