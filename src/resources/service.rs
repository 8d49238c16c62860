//! `kong_service`: an upstream API Kong proxies to.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_range, remote_list, KongResource};
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::{EntityRef, Service};
use crate::schema::{Attribute, Diagnostic, Schema};

pub const PROTOCOLS: &[&str] = &["http", "https", "grpc", "grpcs", "tcp", "tls", "udp"];

/// Integer attributes and the ranges Kong accepts for them.
const RANGES: &[(&str, i64, i64)] = &[
    ("port", 0, 65535),
    ("retries", 0, 32767),
    ("connect_timeout", 1, 2147483646),
    ("write_timeout", 1, 2147483646),
    ("read_timeout", 1, 2147483646),
    ("tls_verify_depth", 0, 64),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceState {
    pub id: Option<String>,
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub retries: Option<u32>,
    pub connect_timeout: Option<u32>,
    pub write_timeout: Option<u32>,
    pub read_timeout: Option<u32>,
    pub tls_verify: Option<bool>,
    pub tls_verify_depth: Option<u32>,
    pub client_certificate_id: Option<String>,
    pub ca_certificate_ids: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

pub struct ServiceResource;

impl KongResource for ServiceResource {
    const TYPE_NAME: &'static str = "kong_service";
    type State = ServiceState;
    type Entity = Service;

    fn schema() -> Schema {
        let timeout = || Attribute::optional_int64().with_default(json!(60000));
        Schema::v0()
            .with_description("A Kong service: the upstream API that routes proxy to")
            .with_attribute("id", Attribute::id())
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "protocol",
                Attribute::optional_string()
                    .with_default(json!("http"))
                    .with_allowed_values(PROTOCOLS.iter().copied()),
            )
            .with_attribute("host", Attribute::required_string())
            .with_attribute("port", Attribute::optional_int64().with_default(json!(80)))
            .with_attribute("path", Attribute::optional_string())
            .with_attribute("retries", Attribute::optional_int64().with_default(json!(5)))
            .with_attribute("connect_timeout", timeout())
            .with_attribute("write_timeout", timeout())
            .with_attribute("read_timeout", timeout())
            .with_attribute("tls_verify", Attribute::optional_bool())
            .with_attribute("tls_verify_depth", Attribute::optional_int64())
            .with_attribute(
                "client_certificate_id",
                Attribute::optional_string().with_description("Certificate presented to the upstream"),
            )
            .with_attribute("ca_certificate_ids", Attribute::optional_string_list())
            .with_attribute("tags", Attribute::tags())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        RANGES
            .iter()
            .filter_map(|(attribute, min, max)| check_range(config, attribute, *min, *max))
            .collect()
    }

    fn collection_path(_state: &ServiceState) -> Result<String, ProviderError> {
        Ok("/services".to_string())
    }

    fn state_id(state: &ServiceState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &ServiceState, _config: &KongConfig) -> Result<Service, ProviderError> {
        Ok(Service {
            id: None,
            name: state.name.clone(),
            protocol: state.protocol.clone(),
            host: state.host.clone(),
            port: state.port,
            path: state.path.clone(),
            retries: state.retries,
            connect_timeout: state.connect_timeout,
            write_timeout: state.write_timeout,
            read_timeout: state.read_timeout,
            tls_verify: state.tls_verify,
            tls_verify_depth: state.tls_verify_depth,
            client_certificate: EntityRef::from_id(state.client_certificate_id.as_ref()),
            ca_certificates: state.ca_certificate_ids.clone(),
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        service: Service,
        prior: &ServiceState,
        _config: &KongConfig,
    ) -> Result<ServiceState, ProviderError> {
        Ok(ServiceState {
            id: service.id,
            name: service.name,
            protocol: service.protocol,
            host: service.host,
            port: service.port,
            path: service.path,
            retries: service.retries,
            connect_timeout: service.connect_timeout,
            write_timeout: service.write_timeout,
            read_timeout: service.read_timeout,
            tls_verify: service.tls_verify,
            tls_verify_depth: service.tls_verify_depth,
            client_certificate_id: service.client_certificate.map(|c| c.id),
            ca_certificate_ids: remote_list(service.ca_certificates, prior.ca_certificate_ids.as_ref()),
            tags: remote_list(service.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<ServiceState, ProviderError> {
        Ok(ServiceState {
            id: Some(id.to_string()),
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
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kong_service(id: &str) -> Value {
        json!({
            "id": id,
            "name": "billing",
            "protocol": "http",
            "host": "billing.internal",
            "port": 80,
            "path": null,
            "retries": 5,
            "connect_timeout": 60000,
            "write_timeout": 60000,
            "read_timeout": 60000,
            "tls_verify": null,
            "tls_verify_depth": null,
            "client_certificate": null,
            "ca_certificates": null,
            "tags": null,
            "created_at": 1700000000,
            "updated_at": 1700000000
        })
    }

    #[test]
    fn test_schema_rejects_unknown_protocol() {
        let diagnostics = validate(
            &ServiceResource::schema(),
            &json!({"name": "billing", "host": "h", "protocol": "ws"}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("protocol"));
    }

    #[test]
    fn test_out_of_range_port_points_at_attribute() {
        let config = json!({"name": "billing", "host": "h", "port": 70000, "read_timeout": 0});
        assert!(validate(&ServiceResource::schema(), &config).is_empty());

        let diagnostics = ServiceResource::validate(&config);
        let paths: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(paths, vec!["port", "read_timeout"]);

        let fine = json!({"name": "billing", "host": "h", "port": 8443});
        assert!(ServiceResource::validate(&fine).is_empty());
    }

    #[tokio::test]
    async fn test_create_sends_planned_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services"))
            .and(body_json(json!({
                "name": "billing",
                "protocol": "http",
                "host": "billing.internal",
                "port": 80,
                "path": null,
                "retries": 5,
                "connect_timeout": 60000,
                "write_timeout": 60000,
                "read_timeout": 60000,
                "tls_verify": null,
                "tls_verify_depth": null,
                "client_certificate": null,
                "ca_certificates": null,
                "tags": null
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_service("svc-1")))
            .expect(1)
            .mount(&server)
            .await;

        let plan = plan_resource(
            &ServiceResource::schema(),
            None,
            &json!({"name": "billing", "host": "billing.internal"}),
        );
        let handler = Handler::<ServiceResource>::new();
        let state = handler
            .create(&context(&server), plan.planned_state.clone())
            .await
            .unwrap();

        assert_eq!(state["id"], "svc-1");
        assert_eq!(state["port"], 80);

        // Kong's answer matches the plan, so planning again shows no drift.
        let replan = plan_resource(
            &ServiceResource::schema(),
            Some(&state),
            &json!({"name": "billing", "host": "billing.internal"}),
        );
        assert!(!replan.has_changes(), "{:?}", replan.changes);
    }

    #[tokio::test]
    async fn test_read_maps_certificate_reference() {
        let server = MockServer::start().await;
        let mut body = kong_service("svc-1");
        body["client_certificate"] = json!({"id": "cert-1"});
        body["tags"] = json!(["billing"]);
        Mock::given(method("GET"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let state = Handler::<ServiceResource>::new()
            .read(&context(&server), json!({"id": "svc-1"}))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state["client_certificate_id"], "cert-1");
        assert_eq!(state["tags"], json!(["billing"]));
        assert_eq!(state["host"], "billing.internal");
    }

    #[tokio::test]
    async fn test_read_missing_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not found"})))
            .mount(&server)
            .await;

        let state = Handler::<ServiceResource>::new()
            .read(&context(&server), json!({"id": "gone"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_update_patches_by_prior_id() {
        let server = MockServer::start().await;
        let mut updated = kong_service("svc-1");
        updated["port"] = json!(8080);
        Mock::given(method("PATCH"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(updated))
            .expect(1)
            .mount(&server)
            .await;

        let prior = json!({"id": "svc-1", "name": "billing", "host": "billing.internal", "port": 80});
        let planned = json!({"id": "svc-1", "name": "billing", "host": "billing.internal", "port": 8080});
        let state = Handler::<ServiceResource>::new()
            .update(&context(&server), prior, planned)
            .await
            .unwrap();
        assert_eq!(state["port"], 8080);
    }

    #[tokio::test]
    async fn test_delete_and_import() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_service("svc-1")))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let handler = Handler::<ServiceResource>::new();
        let imported = handler.import(&ctx, "svc-1").await.unwrap().unwrap();
        assert_eq!(imported["name"], "billing");

        handler.delete(&ctx, imported).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_id_fails() {
        let server = MockServer::start().await;
        let err = Handler::<ServiceResource>::new()
            .delete(&context(&server), json!({"name": "billing"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
