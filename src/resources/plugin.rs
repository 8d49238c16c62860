//! `kong_plugin` and `kong_consumer_plugin_config`.
//!
//! Plugin configuration travels as a JSON string (`config_json`). Kong
//! answers with the full configuration including every default it filled
//! in; that full document is kept in `computed_config`. Unless
//! `strict_plugins_match` is set, the `config_json` read back is reduced to
//! the keys the user wrote so Kong's defaults never show up as drift.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{invalid, parent_id, remote_list, KongResource};
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::{ConsumerPluginConfig, EntityRef, Plugin};
use crate::kong::segment;
use crate::schema::{Attribute, Diagnostic, Schema};

/// Keys Kong adds to consumer plugin configs that are not configuration.
const CONSUMER_CONFIG_METADATA: &[&str] = &["id", "consumer", "created_at"];

/// Parse `config_json`, which must hold a JSON object.
fn parse_config(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(err) => Err(err.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn validate_config_json(config: &Value) -> Vec<Diagnostic> {
    match config.get("config_json").and_then(Value::as_str) {
        Some(raw) => match parse_config(raw) {
            Ok(_) => Vec::new(),
            Err(reason) => vec![invalid("Invalid config_json", "config_json").with_detail(reason)],
        }
        None => Vec::new(),
    }
}

fn config_object(raw: Option<&str>) -> Result<Option<Map<String, Value>>, ProviderError> {
    raw.map(|raw| {
        parse_config(raw).map_err(|reason| {
            ProviderError::Validation(format!("Invalid config_json: {}", reason))
        })
    })
    .transpose()
}

/// Reduce `remote` to the keys present in `wanted`, recursively through
/// objects. Arrays and scalars are taken as Kong reports them.
pub fn filter_to_keys(remote: &Value, wanted: &Value) -> Value {
    match (remote, wanted) {
        (Value::Object(remote), Value::Object(wanted)) => Value::Object(
            wanted
                .iter()
                .filter_map(|(key, want)| {
                    remote
                        .get(key)
                        .map(|have| (key.clone(), filter_to_keys(have, want)))
                })
                .collect(),
        ),
        _ => remote.clone(),
    }
}

/// Compute the `config_json` to store from Kong's answer.
///
/// When the reported configuration is equivalent to what the user wrote,
/// the user's string is kept verbatim so formatting never shows as a diff.
fn reconcile_config(
    remote: &Value,
    prior: Option<&str>,
    strict: bool,
) -> Result<Option<String>, ProviderError> {
    let wanted = prior.and_then(|raw| serde_json::from_str::<Value>(raw).ok());

    let reported = match (&wanted, strict) {
        (_, true) => remote.clone(),
        (Some(wanted), false) => filter_to_keys(remote, wanted),
        (None, false) => return Ok(None),
    };

    if wanted.as_ref() == Some(&reported) {
        return Ok(prior.map(str::to_string));
    }
    Ok(Some(serde_json::to_string(&reported)?))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginState {
    pub id: Option<String>,
    pub name: Option<String>,
    pub consumer_id: Option<String>,
    pub service_id: Option<String>,
    pub route_id: Option<String>,
    pub enabled: Option<bool>,
    pub config_json: Option<String>,
    pub computed_config: Option<String>,
    pub protocols: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

pub struct PluginResource;

impl KongResource for PluginResource {
    const TYPE_NAME: &'static str = "kong_plugin";
    type State = PluginState;
    type Entity = Plugin;

    fn schema() -> Schema {
        let scope = |what: &str| {
            Attribute::optional_string()
                .with_force_new()
                .with_description(format!("Apply the plugin to this {} only", what))
        };
        Schema::v0()
            .with_description("A Kong plugin, global or scoped to a consumer, service or route")
            .with_attribute("id", Attribute::id())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("consumer_id", scope("consumer"))
            .with_attribute("service_id", scope("service"))
            .with_attribute("route_id", scope("route"))
            .with_attribute("enabled", Attribute::optional_bool().with_default(json!(true)))
            .with_attribute(
                "config_json",
                Attribute::optional_string().with_description("Plugin configuration as a JSON object"),
            )
            .with_attribute(
                "computed_config",
                Attribute::computed_string().with_description("Full configuration as reported by Kong"),
            )
            .with_attribute("protocols", Attribute::optional_computed_string_list())
            .with_attribute("tags", Attribute::tags())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        validate_config_json(config)
    }

    fn collection_path(_state: &PluginState) -> Result<String, ProviderError> {
        Ok("/plugins".to_string())
    }

    fn state_id(state: &PluginState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &PluginState, _config: &KongConfig) -> Result<Plugin, ProviderError> {
        let name = state
            .name
            .clone()
            .ok_or_else(|| ProviderError::Validation("kong_plugin requires name".to_string()))?;
        Ok(Plugin {
            id: None,
            name,
            consumer: EntityRef::from_id(state.consumer_id.as_ref()),
            service: EntityRef::from_id(state.service_id.as_ref()),
            route: EntityRef::from_id(state.route_id.as_ref()),
            config: config_object(state.config_json.as_deref())?.map(Value::Object),
            enabled: state.enabled,
            protocols: state.protocols.clone(),
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        plugin: Plugin,
        prior: &PluginState,
        config: &KongConfig,
    ) -> Result<PluginState, ProviderError> {
        let (config_json, computed_config) = match &plugin.config {
            Some(remote) => (
                reconcile_config(remote, prior.config_json.as_deref(), config.strict_plugins_match)?,
                Some(serde_json::to_string(remote)?),
            ),
            None => (None, None),
        };

        Ok(PluginState {
            id: plugin.id,
            name: Some(plugin.name),
            consumer_id: plugin.consumer.map(|c| c.id),
            service_id: plugin.service.map(|s| s.id),
            route_id: plugin.route.map(|r| r.id),
            enabled: plugin.enabled,
            config_json,
            computed_config,
            protocols: plugin.protocols,
            tags: remote_list(plugin.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<PluginState, ProviderError> {
        Ok(PluginState {
            id: Some(id.to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerPluginConfigState {
    pub id: Option<String>,
    pub consumer_id: Option<String>,
    pub plugin_name: Option<String>,
    pub config_json: Option<String>,
    pub computed_config: Option<String>,
}

pub struct ConsumerPluginConfigResource;

impl KongResource for ConsumerPluginConfigResource {
    const TYPE_NAME: &'static str = "kong_consumer_plugin_config";
    type State = ConsumerPluginConfigState;
    type Entity = ConsumerPluginConfig;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("Per-consumer settings of a plugin, e.g. ACL groups or JWT keys")
            .with_attribute("id", Attribute::id())
            .with_attribute("consumer_id", Attribute::required_string().with_force_new())
            .with_attribute(
                "plugin_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Consumer sub-collection, e.g. 'acls' or 'jwt'"),
            )
            .with_attribute("config_json", Attribute::optional_string())
            .with_attribute("computed_config", Attribute::computed_string())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        validate_config_json(config)
    }

    fn collection_path(state: &ConsumerPluginConfigState) -> Result<String, ProviderError> {
        let consumer = parent_id(Self::TYPE_NAME, "consumer_id", &state.consumer_id)?;
        let plugin = parent_id(Self::TYPE_NAME, "plugin_name", &state.plugin_name)?;
        Ok(format!("/consumers/{}/{}", segment(consumer), segment(plugin)))
    }

    fn state_id(state: &ConsumerPluginConfigState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(
        state: &ConsumerPluginConfigState,
        _config: &KongConfig,
    ) -> Result<ConsumerPluginConfig, ProviderError> {
        Ok(ConsumerPluginConfig {
            id: None,
            fields: config_object(state.config_json.as_deref())?.unwrap_or_default(),
        })
    }

    fn to_state(
        entity: ConsumerPluginConfig,
        prior: &ConsumerPluginConfigState,
        config: &KongConfig,
    ) -> Result<ConsumerPluginConfigState, ProviderError> {
        let remote = Value::Object(
            entity
                .fields
                .into_iter()
                .filter(|(key, _)| !CONSUMER_CONFIG_METADATA.contains(&key.as_str()))
                .collect(),
        );

        Ok(ConsumerPluginConfigState {
            id: entity.id,
            consumer_id: prior.consumer_id.clone(),
            plugin_name: prior.plugin_name.clone(),
            config_json: reconcile_config(
                &remote,
                prior.config_json.as_deref(),
                config.strict_plugins_match,
            )?,
            computed_config: Some(serde_json::to_string(&remote)?),
        })
    }

    /// Import ids are `consumer_id/plugin_name/id`.
    fn import_state(id: &str) -> Result<ConsumerPluginConfigState, ProviderError> {
        let parts: Vec<&str> = id.split('/').collect();
        match parts.as_slice() {
            [consumer, plugin, entity] if parts.iter().all(|p| !p.is_empty()) => {
                Ok(ConsumerPluginConfigState {
                    id: Some(entity.to_string()),
                    consumer_id: Some(consumer.to_string()),
                    plugin_name: Some(plugin.to_string()),
                    ..Default::default()
                })
            }
            _ => Err(ProviderError::Validation(format!(
                "{} import id must be '<consumer_id>/<plugin_name>/<id>', got '{}'",
                Self::TYPE_NAME,
                id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_resource;
    use crate::resources::test_support::{context, context_with};
    use crate::resources::{Handler, ResourceHandler};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kong_rate_limiting() -> Value {
        json!({
            "id": "plugin-1",
            "name": "rate-limiting",
            "consumer": null,
            "service": {"id": "svc-1"},
            "route": null,
            "enabled": true,
            "protocols": ["grpc", "grpcs", "http", "https"],
            "tags": null,
            "config": {
                "minute": 10,
                "hour": null,
                "policy": "local",
                "limit_by": "consumer",
                "redis": {"host": null, "port": 6379}
            }
        })
    }

    #[test]
    fn test_filter_to_keys() {
        let remote = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": [1, 2]});
        let wanted = json!({"b": {"c": 0}, "e": [], "missing": true});
        assert_eq!(
            filter_to_keys(&remote, &wanted),
            json!({"b": {"c": 2}, "e": [1, 2]})
        );
    }

    #[test]
    fn test_reconcile_keeps_user_formatting() {
        let remote = kong_rate_limiting()["config"].clone();
        let prior = r#"{ "minute" : 10 }"#;

        assert_eq!(
            reconcile_config(&remote, Some(prior), false).unwrap().as_deref(),
            Some(prior)
        );

        let drifted = r#"{"minute": 20}"#;
        assert_eq!(
            reconcile_config(&remote, Some(drifted), false).unwrap().as_deref(),
            Some(r#"{"minute":10}"#)
        );

        assert_eq!(reconcile_config(&remote, None, false).unwrap(), None);

        let strict = reconcile_config(&remote, Some(prior), true).unwrap().unwrap();
        let strict: Value = serde_json::from_str(&strict).unwrap();
        assert_eq!(strict["policy"], "local");
    }

    #[test]
    fn test_validate_config_json() {
        assert!(PluginResource::validate(&json!({"config_json": "{\"minute\": 1}"})).is_empty());

        let diagnostics = PluginResource::validate(&json!({"config_json": "[1, 2]"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].detail.as_deref(), Some("expected a JSON object, got an array"));

        assert_eq!(PluginResource::validate(&json!({"config_json": "{"})).len(), 1);
    }

    #[test]
    fn test_scope_change_requires_replace() {
        let prior = json!({"id": "plugin-1", "name": "cors", "service_id": "svc-1", "enabled": true});
        let plan = plan_resource(
            &PluginResource::schema(),
            Some(&prior),
            &json!({"name": "cors", "service_id": "svc-2"}),
        );
        assert!(plan.requires_replace);
    }

    #[tokio::test]
    async fn test_create_plugin_reduces_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/plugins"))
            .and(body_json(json!({
                "name": "rate-limiting",
                "service": {"id": "svc-1"},
                "config": {"minute": 10},
                "enabled": true,
                "tags": null
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_rate_limiting()))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({
            "name": "rate-limiting",
            "service_id": "svc-1",
            "config_json": "{\"minute\": 10}"
        });
        let plan = plan_resource(&PluginResource::schema(), None, &config);
        let state = Handler::<PluginResource>::new()
            .create(&context(&server), plan.planned_state)
            .await
            .unwrap();

        assert_eq!(state["config_json"], "{\"minute\": 10}");
        let computed: Value =
            serde_json::from_str(state["computed_config"].as_str().unwrap()).unwrap();
        assert_eq!(computed["policy"], "local");
        assert_eq!(state["service_id"], "svc-1");
        assert!(state["consumer_id"].is_null());

        let replan = plan_resource(&PluginResource::schema(), Some(&state), &config);
        assert!(!replan.has_changes(), "{:?}", replan.changes);
    }

    #[tokio::test]
    async fn test_read_plugin_strict_match_reports_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/plugin-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_rate_limiting()))
            .mount(&server)
            .await;

        let ctx = context_with(
            &server,
            KongConfig {
                strict_plugins_match: true,
                ..Default::default()
            },
        );
        let state = Handler::<PluginResource>::new()
            .read(&ctx, json!({"id": "plugin-1", "config_json": "{\"minute\": 10}"}))
            .await
            .unwrap()
            .unwrap();

        let config: Value = serde_json::from_str(state["config_json"].as_str().unwrap()).unwrap();
        assert_eq!(config["limit_by"], "consumer");
    }

    #[test]
    fn test_consumer_plugin_config_import_id() {
        let state = ConsumerPluginConfigResource::import_state("c-1/acls/acl-1").unwrap();
        assert_eq!(state.consumer_id.as_deref(), Some("c-1"));
        assert_eq!(state.plugin_name.as_deref(), Some("acls"));
        assert_eq!(state.id.as_deref(), Some("acl-1"));

        assert!(ConsumerPluginConfigResource::import_state("c-1/acl-1").is_err());
        assert!(ConsumerPluginConfigResource::import_state("c-1//acl-1").is_err());
    }

    #[tokio::test]
    async fn test_consumer_plugin_config_lifecycle() {
        let server = MockServer::start().await;
        let kong_acl = json!({
            "id": "acl-1",
            "group": "admins",
            "consumer": {"id": "c-1"},
            "created_at": 1700000000,
            "tags": null
        });
        Mock::given(method("POST"))
            .and(path("/consumers/c-1/acls"))
            .and(body_json(json!({"group": "admins"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_acl.clone()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consumers/c-1/acls/acl-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_acl))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/consumers/c-1/acls/acl-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server);
        let handler = Handler::<ConsumerPluginConfigResource>::new();
        let state = handler
            .create(
                &ctx,
                json!({"consumer_id": "c-1", "plugin_name": "acls", "config_json": "{\"group\": \"admins\"}"}),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "acl-1");
        assert_eq!(state["config_json"], "{\"group\": \"admins\"}");
        let computed: Value =
            serde_json::from_str(state["computed_config"].as_str().unwrap()).unwrap();
        assert_eq!(computed, json!({"group": "admins", "tags": null}));

        let imported = handler.import(&ctx, "c-1/acls/acl-1").await.unwrap().unwrap();
        assert_eq!(imported["consumer_id"], "c-1");
        assert!(imported["config_json"].is_null());

        handler.delete(&ctx, state).await.unwrap();
    }
}
