//! `kong_upstream` and `kong_target`: load balancing pools and their members.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{invalid, parent_id, remote_list, split_import_id, KongResource};
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::{EntityRef, Healthchecks, Target, Upstream};
use crate::kong::segment;
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema,
};

const ALGORITHMS: &[&str] = &["round-robin", "consistent-hashing", "least-connections", "latency"];
const HASH_INPUTS: &[&str] = &[
    "none", "consumer", "ip", "header", "cookie", "path", "query_arg", "uri_capture",
];
const CHECK_TYPES: &[&str] = &["http", "https", "tcp", "grpc", "grpcs"];

fn computed_int() -> Attribute {
    Attribute::optional_computed_int64()
}

fn computed_float() -> Attribute {
    Attribute::new(AttributeType::Float64, AttributeFlags::optional_computed())
}

fn status_list() -> Attribute {
    Attribute::new(
        AttributeType::list(AttributeType::Int64),
        AttributeFlags::optional_computed(),
    )
}

fn check_type() -> Attribute {
    Attribute::optional_computed_string().with_allowed_values(CHECK_TYPES.iter().copied())
}

fn healthy_block() -> NestedBlock {
    NestedBlock::single(
        Block::new()
            .with_attribute("interval", computed_float())
            .with_attribute("http_statuses", status_list())
            .with_attribute("successes", computed_int()),
    )
    .computed()
}

fn unhealthy_block() -> NestedBlock {
    NestedBlock::single(
        Block::new()
            .with_attribute("interval", computed_float())
            .with_attribute("http_statuses", status_list())
            .with_attribute("tcp_failures", computed_int())
            .with_attribute("timeouts", computed_int())
            .with_attribute("http_failures", computed_int()),
    )
    .computed()
}

/// Health checking settings. Kong fills every unset field, so all of them
/// are optional and computed.
fn healthchecks_block() -> NestedBlock {
    let active = Block::new()
        .with_description("Probes Kong sends to targets")
        .with_attribute("type", check_type())
        .with_attribute("timeout", computed_float())
        .with_attribute("concurrency", computed_int())
        .with_attribute("http_path", Attribute::optional_computed_string())
        .with_attribute("https_verify_certificate", Attribute::optional_computed_bool())
        .with_attribute("https_sni", Attribute::optional_string())
        .with_block("healthy", healthy_block())
        .with_block("unhealthy", unhealthy_block());

    let passive = Block::new()
        .with_description("Health inferred from proxied traffic")
        .with_attribute("type", check_type())
        .with_block("healthy", healthy_block())
        .with_block("unhealthy", unhealthy_block());

    NestedBlock::single(
        Block::new()
            .with_attribute("threshold", computed_float())
            .with_block("active", NestedBlock::single(active).computed())
            .with_block("passive", NestedBlock::single(passive).computed()),
    )
    .computed()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamState {
    pub id: Option<String>,
    pub name: Option<String>,
    pub algorithm: Option<String>,
    pub slots: Option<u32>,
    pub hash_on: Option<String>,
    pub hash_fallback: Option<String>,
    pub hash_on_header: Option<String>,
    pub hash_fallback_header: Option<String>,
    pub hash_on_cookie: Option<String>,
    pub hash_on_cookie_path: Option<String>,
    pub host_header: Option<String>,
    pub client_certificate_id: Option<String>,
    pub healthchecks: Option<Healthchecks>,
    pub tags: Option<Vec<String>>,
}

pub struct UpstreamResource;

impl KongResource for UpstreamResource {
    const TYPE_NAME: &'static str = "kong_upstream";
    type State = UpstreamState;
    type Entity = Upstream;

    fn schema() -> Schema {
        let hash = || Attribute::optional_computed_string().with_allowed_values(HASH_INPUTS.iter().copied());
        Schema::v0()
            .with_description("A Kong upstream: a virtual hostname balancing over targets")
            .with_attribute("id", Attribute::id())
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "algorithm",
                Attribute::optional_computed_string().with_allowed_values(ALGORITHMS.iter().copied()),
            )
            .with_attribute("slots", Attribute::optional_int64().with_default(json!(10000)))
            .with_attribute("hash_on", hash())
            .with_attribute("hash_fallback", hash())
            .with_attribute("hash_on_header", Attribute::optional_string())
            .with_attribute("hash_fallback_header", Attribute::optional_string())
            .with_attribute("hash_on_cookie", Attribute::optional_string())
            .with_attribute("hash_on_cookie_path", Attribute::optional_computed_string())
            .with_attribute("host_header", Attribute::optional_string())
            .with_attribute("client_certificate_id", Attribute::optional_string())
            .with_block("healthchecks", healthchecks_block())
            .with_attribute("tags", Attribute::tags())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        let get = |key: &str| config.get(key).and_then(Value::as_str);
        let mut diagnostics = Vec::new();

        for (input, header_attr) in [
            ("hash_on", "hash_on_header"),
            ("hash_fallback", "hash_fallback_header"),
        ] {
            if get(input) == Some("header") && get(header_attr).is_none() {
                diagnostics.push(invalid(
                    format!("'{}' is required when {} is 'header'", header_attr, input),
                    header_attr,
                ));
            }
        }

        let uses_cookie = get("hash_on") == Some("cookie") || get("hash_fallback") == Some("cookie");
        if uses_cookie && get("hash_on_cookie").is_none() {
            diagnostics.push(invalid(
                "'hash_on_cookie' is required when hashing on a cookie",
                "hash_on_cookie",
            ));
        }

        diagnostics
    }

    fn collection_path(_state: &UpstreamState) -> Result<String, ProviderError> {
        Ok("/upstreams".to_string())
    }

    fn state_id(state: &UpstreamState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &UpstreamState, _config: &KongConfig) -> Result<Upstream, ProviderError> {
        let name = state
            .name
            .clone()
            .ok_or_else(|| ProviderError::Validation("kong_upstream requires name".to_string()))?;
        Ok(Upstream {
            id: None,
            name,
            algorithm: state.algorithm.clone(),
            slots: state.slots,
            hash_on: state.hash_on.clone(),
            hash_fallback: state.hash_fallback.clone(),
            hash_on_header: state.hash_on_header.clone(),
            hash_fallback_header: state.hash_fallback_header.clone(),
            hash_on_cookie: state.hash_on_cookie.clone(),
            hash_on_cookie_path: state.hash_on_cookie_path.clone(),
            host_header: state.host_header.clone(),
            client_certificate: EntityRef::from_id(state.client_certificate_id.as_ref()),
            healthchecks: state.healthchecks.clone(),
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        upstream: Upstream,
        prior: &UpstreamState,
        _config: &KongConfig,
    ) -> Result<UpstreamState, ProviderError> {
        Ok(UpstreamState {
            id: upstream.id,
            name: Some(upstream.name),
            algorithm: upstream.algorithm,
            slots: upstream.slots,
            hash_on: upstream.hash_on,
            hash_fallback: upstream.hash_fallback,
            hash_on_header: upstream.hash_on_header,
            hash_fallback_header: upstream.hash_fallback_header,
            hash_on_cookie: upstream.hash_on_cookie,
            hash_on_cookie_path: upstream.hash_on_cookie_path,
            host_header: upstream.host_header,
            client_certificate_id: upstream.client_certificate.map(|c| c.id),
            healthchecks: upstream.healthchecks,
            tags: remote_list(upstream.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<UpstreamState, ProviderError> {
        Ok(UpstreamState {
            id: Some(id.to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetState {
    pub id: Option<String>,
    pub target: Option<String>,
    pub weight: Option<u32>,
    pub upstream_id: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct TargetResource;

impl KongResource for TargetResource {
    const TYPE_NAME: &'static str = "kong_target";
    const UPDATABLE: bool = false;
    type State = TargetState;
    type Entity = Target;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("A backend address receiving traffic from an upstream")
            .with_attribute("id", Attribute::id())
            .with_attribute(
                "target",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("host:port of the backend"),
            )
            .with_attribute(
                "weight",
                Attribute::optional_int64().with_default(json!(100)).with_force_new(),
            )
            .with_attribute("upstream_id", Attribute::required_string().with_force_new())
            .with_attribute("tags", Attribute::tags().with_force_new())
    }

    fn collection_path(state: &TargetState) -> Result<String, ProviderError> {
        let upstream = parent_id(Self::TYPE_NAME, "upstream_id", &state.upstream_id)?;
        Ok(format!("/upstreams/{}/targets", segment(upstream)))
    }

    fn state_id(state: &TargetState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &TargetState, _config: &KongConfig) -> Result<Target, ProviderError> {
        let target = state
            .target
            .clone()
            .ok_or_else(|| ProviderError::Validation("kong_target requires target".to_string()))?;
        Ok(Target {
            id: None,
            target,
            weight: state.weight,
            upstream: None,
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        target: Target,
        prior: &TargetState,
        _config: &KongConfig,
    ) -> Result<TargetState, ProviderError> {
        Ok(TargetState {
            id: target.id,
            target: Some(target.target),
            weight: target.weight,
            upstream_id: target.upstream.map(|u| u.id).or_else(|| prior.upstream_id.clone()),
            tags: remote_list(target.tags, prior.tags.as_ref()),
        })
    }

    /// Import ids are `upstream_id/target_id`.
    fn import_state(id: &str) -> Result<TargetState, ProviderError> {
        let (upstream, target) = split_import_id(Self::TYPE_NAME, id)?;
        Ok(TargetState {
            id: Some(target.to_string()),
            upstream_id: Some(upstream.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_resource;
    use crate::resources::test_support::context;
    use crate::resources::{Handler, ResourceHandler};
    use crate::validation::validate;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kong_upstream() -> Value {
        json!({
            "id": "up-1",
            "name": "orders.v1.service",
            "algorithm": "round-robin",
            "slots": 10000,
            "hash_on": "none",
            "hash_fallback": "none",
            "hash_on_header": null,
            "hash_fallback_header": null,
            "hash_on_cookie": null,
            "hash_on_cookie_path": "/",
            "host_header": null,
            "client_certificate": null,
            "tags": null,
            "healthchecks": {
                "threshold": 0,
                "active": {
                    "type": "http",
                    "timeout": 1,
                    "concurrency": 10,
                    "http_path": "/health",
                    "https_verify_certificate": true,
                    "healthy": {"interval": 0, "http_statuses": [200, 302], "successes": 0},
                    "unhealthy": {
                        "interval": 0,
                        "http_statuses": [429, 404, 500],
                        "tcp_failures": 0,
                        "timeouts": 0,
                        "http_failures": 0
                    }
                },
                "passive": {
                    "type": "http",
                    "healthy": {"http_statuses": [200, 201], "successes": 0},
                    "unhealthy": {"http_statuses": [429, 500, 503], "tcp_failures": 0, "timeouts": 0, "http_failures": 0}
                }
            }
        })
    }

    fn config() -> Value {
        json!({
            "name": "orders.v1.service",
            "healthchecks": {"active": {"http_path": "/health"}}
        })
    }

    #[test]
    fn test_validate_healthchecks_schema() {
        assert!(validate(&UpstreamResource::schema(), &config()).is_empty());

        let bad = json!({
            "name": "orders",
            "healthchecks": {"active": {"type": "icmp", "healthy": {"http_statuses": ["ok"]}}}
        });
        let diagnostics = validate(&UpstreamResource::schema(), &bad);
        let paths: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert!(paths.contains(&"healthchecks.active.type"));
        assert!(paths.contains(&"healthchecks.active.healthy.http_statuses.0"));
    }

    #[test]
    fn test_hash_inputs_need_their_source() {
        let diagnostics = UpstreamResource::validate(&json!({
            "hash_on": "header",
            "hash_fallback": "cookie"
        }));
        let paths: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(paths, vec!["hash_on_header", "hash_on_cookie"]);

        assert!(UpstreamResource::validate(&json!({
            "hash_on": "header",
            "hash_on_header": "x-user"
        }))
        .is_empty());
    }

    #[tokio::test]
    async fn test_create_upstream_keeps_kong_healthcheck_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upstreams"))
            .and(body_partial_json(json!({
                "name": "orders.v1.service",
                "slots": 10000,
                "healthchecks": {"active": {"http_path": "/health"}}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_upstream()))
            .expect(1)
            .mount(&server)
            .await;

        let plan = plan_resource(&UpstreamResource::schema(), None, &config());
        let state = Handler::<UpstreamResource>::new()
            .create(&context(&server), plan.planned_state)
            .await
            .unwrap();

        assert_eq!(state["healthchecks"]["active"]["concurrency"], 10);
        assert_eq!(state["algorithm"], "round-robin");

        let replan = plan_resource(&UpstreamResource::schema(), Some(&state), &config());
        assert!(!replan.has_changes(), "{:?}", replan.changes);

        let mut tuned = config();
        tuned["healthchecks"]["active"]["concurrency"] = json!(5);
        let replan = plan_resource(&UpstreamResource::schema(), Some(&state), &tuned);
        assert_eq!(replan.changes.len(), 1);
        assert_eq!(replan.changes[0].path, "healthchecks.active.concurrency");
        assert!(!replan.requires_replace);
    }

    #[tokio::test]
    async fn test_read_fractional_probe_interval() {
        let server = MockServer::start().await;
        let mut body = kong_upstream();
        body["healthchecks"]["active"]["healthy"]["interval"] = json!(2.5);
        body["healthchecks"]["active"]["unhealthy"]["interval"] = json!(0.5);
        Mock::given(method("GET"))
            .and(path("/upstreams/up-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let state = Handler::<UpstreamResource>::new()
            .read(&context(&server), json!({"id": "up-1"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["healthchecks"]["active"]["healthy"]["interval"], 2.5);
        assert_eq!(state["healthchecks"]["active"]["unhealthy"]["interval"], 0.5);

        let mut tuned = config();
        tuned["healthchecks"]["active"]["healthy"] = json!({"interval": 0.5});
        assert!(validate(&UpstreamResource::schema(), &tuned).is_empty());
    }

    #[test]
    fn test_target_changes_require_replace() {
        let prior = json!({"id": "t-1", "target": "10.0.0.1:8080", "weight": 100, "upstream_id": "up-1"});
        let plan = plan_resource(
            &TargetResource::schema(),
            Some(&prior),
            &json!({"target": "10.0.0.1:8080", "weight": 50, "upstream_id": "up-1"}),
        );
        assert!(plan.requires_replace);
        assert!(plan.planned_state["id"].is_null());
    }

    #[tokio::test]
    async fn test_target_lifecycle() {
        let server = MockServer::start().await;
        let kong_target = json!({
            "id": "t-1",
            "target": "10.0.0.1:8080",
            "weight": 100,
            "upstream": {"id": "up-1"},
            "tags": null
        });
        Mock::given(method("POST"))
            .and(path("/upstreams/up-1/targets"))
            .and(body_json(json!({"target": "10.0.0.1:8080", "weight": 100, "tags": null})))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_target.clone()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/upstreams/up-1/targets/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_target))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let handler = Handler::<TargetResource>::new();
        let state = handler
            .create(
                &ctx,
                json!({"target": "10.0.0.1:8080", "weight": 100, "upstream_id": "up-1"}),
            )
            .await
            .unwrap();
        assert_eq!(state["upstream_id"], "up-1");

        let imported = handler.import(&ctx, "up-1/t-1").await.unwrap().unwrap();
        assert_eq!(imported, state);

        let err = handler.update(&ctx, state.clone(), state).await.unwrap_err();
        assert!(err.to_string().contains("cannot be updated in place"));
    }
}
