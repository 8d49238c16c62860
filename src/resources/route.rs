//! `kong_route`: matching rules that send requests to a service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{invalid, parent_id, remote_list, KongResource};
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::{EntityRef, Route, RouteEndpoint};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema};

use super::service::PROTOCOLS;

const REDIRECT_CODES: &[&str] = &["426", "301", "302", "307", "308"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteState {
    pub id: Option<String>,
    pub name: Option<String>,
    pub protocols: Option<Vec<String>>,
    pub methods: Option<Vec<String>>,
    pub hosts: Option<Vec<String>>,
    pub paths: Option<Vec<String>>,
    pub headers: Option<BTreeMap<String, Vec<String>>>,
    pub https_redirect_status_code: Option<u16>,
    pub regex_priority: Option<i64>,
    pub strip_path: Option<bool>,
    pub preserve_host: Option<bool>,
    pub request_buffering: Option<bool>,
    pub response_buffering: Option<bool>,
    pub path_handling: Option<String>,
    pub snis: Option<Vec<String>>,
    pub sources: Option<Vec<RouteEndpoint>>,
    pub destinations: Option<Vec<RouteEndpoint>>,
    pub service_id: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct RouteResource;

fn endpoint_block() -> NestedBlock {
    NestedBlock::list(
        Block::new()
            .with_attribute("ip", Attribute::optional_string())
            .with_attribute("port", Attribute::optional_int64()),
    )
}

impl KongResource for RouteResource {
    const TYPE_NAME: &'static str = "kong_route";
    type State = RouteState;
    type Entity = Route;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("A Kong route: rules matching requests to a service")
            .with_attribute("id", Attribute::id())
            .with_attribute("name", Attribute::optional_string())
            .with_attribute(
                "protocols",
                Attribute::required_string_list().with_allowed_values(PROTOCOLS.iter().copied()),
            )
            .with_attribute("methods", Attribute::optional_string_list())
            .with_attribute("hosts", Attribute::optional_string_list())
            .with_attribute("paths", Attribute::optional_string_list())
            .with_attribute(
                "headers",
                Attribute::new(
                    AttributeType::map(AttributeType::string_list()),
                    AttributeFlags::optional(),
                )
                .with_description("Header names mapped to the values that match"),
            )
            .with_attribute(
                "https_redirect_status_code",
                Attribute::optional_int64().with_default(json!(426)),
            )
            .with_attribute("regex_priority", Attribute::optional_int64().with_default(json!(0)))
            .with_attribute("strip_path", Attribute::optional_bool().with_default(json!(true)))
            .with_attribute("preserve_host", Attribute::optional_bool().with_default(json!(false)))
            .with_attribute(
                "request_buffering",
                Attribute::optional_bool().with_default(json!(true)),
            )
            .with_attribute(
                "response_buffering",
                Attribute::optional_bool().with_default(json!(true)),
            )
            .with_attribute(
                "path_handling",
                Attribute::optional_computed_string().with_allowed_values(["v0", "v1"]),
            )
            .with_attribute("snis", Attribute::optional_string_list())
            .with_block("sources", endpoint_block())
            .with_block("destinations", endpoint_block())
            .with_attribute("service_id", Attribute::required_string())
            .with_attribute("tags", Attribute::tags())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if let Some(code) = config.get("https_redirect_status_code").and_then(Value::as_i64) {
            if !REDIRECT_CODES.contains(&code.to_string().as_str()) {
                diagnostics.push(
                    invalid(
                        format!("Invalid value '{}' for 'https_redirect_status_code'", code),
                        "https_redirect_status_code",
                    )
                    .with_detail(format!("Expected one of: {}", REDIRECT_CODES.join(", "))),
                );
            }
        }
        diagnostics
    }

    fn collection_path(_state: &RouteState) -> Result<String, ProviderError> {
        Ok("/routes".to_string())
    }

    fn state_id(state: &RouteState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &RouteState, _config: &KongConfig) -> Result<Route, ProviderError> {
        let service = parent_id(Self::TYPE_NAME, "service_id", &state.service_id)?;
        Ok(Route {
            id: None,
            name: state.name.clone(),
            protocols: state.protocols.clone(),
            methods: state.methods.clone(),
            hosts: state.hosts.clone(),
            paths: state.paths.clone(),
            headers: state.headers.clone(),
            https_redirect_status_code: state.https_redirect_status_code,
            regex_priority: state.regex_priority,
            strip_path: state.strip_path,
            preserve_host: state.preserve_host,
            request_buffering: state.request_buffering,
            response_buffering: state.response_buffering,
            path_handling: state.path_handling.clone(),
            snis: state.snis.clone(),
            sources: state.sources.clone(),
            destinations: state.destinations.clone(),
            service: Some(EntityRef::new(service)),
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        route: Route,
        prior: &RouteState,
        _config: &KongConfig,
    ) -> Result<RouteState, ProviderError> {
        Ok(RouteState {
            id: route.id,
            name: route.name,
            protocols: route.protocols,
            methods: remote_list(route.methods, prior.methods.as_ref()),
            hosts: remote_list(route.hosts, prior.hosts.as_ref()),
            paths: remote_list(route.paths, prior.paths.as_ref()),
            headers: route.headers.filter(|h| !h.is_empty()),
            https_redirect_status_code: route.https_redirect_status_code,
            regex_priority: route.regex_priority,
            strip_path: route.strip_path,
            preserve_host: route.preserve_host,
            request_buffering: route.request_buffering,
            response_buffering: route.response_buffering,
            path_handling: route.path_handling,
            snis: remote_list(route.snis, prior.snis.as_ref()),
            sources: remote_list(route.sources, prior.sources.as_ref()),
            destinations: remote_list(route.destinations, prior.destinations.as_ref()),
            service_id: route.service.map(|s| s.id).or_else(|| prior.service_id.clone()),
            tags: remote_list(route.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<RouteState, ProviderError> {
        Ok(RouteState {
            id: Some(id.to_string()),
            ..Default::default()
        })
    }
}
