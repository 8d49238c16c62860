//! The Kong provider: dispatches protocol calls to resource handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resources::{self, DataSourceHandler, KongContext, ResourceHandler};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities};
use crate::validation::validate;

/// Provider exposing Kong entities as managed resources.
pub struct KongProvider {
    resources: HashMap<&'static str, Box<dyn ResourceHandler>>,
    data_sources: HashMap<&'static str, Box<dyn DataSourceHandler>>,
    context: RwLock<Option<Arc<KongContext>>>,
}

impl Default for KongProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KongProvider {
    pub fn new() -> Self {
        Self {
            resources: resources::resources()
                .into_iter()
                .map(|h| (h.type_name(), h))
                .collect(),
            data_sources: resources::data_sources()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
            context: RwLock::new(None),
        }
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn ResourceHandler, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<&dyn DataSourceHandler, ProviderError> {
        self.data_sources
            .get(data_source_type)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    async fn context(&self) -> Result<Arc<KongContext>, ProviderError> {
        self.context.read().await.clone().ok_or_else(|| {
            ProviderError::FailedPrecondition("provider has not been configured".to_string())
        })
    }
}

#[async_trait::async_trait]
impl ProviderService for KongProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = ProviderSchema::new().with_provider_config(KongConfig::schema());
        let schema = self
            .resources
            .values()
            .fold(schema, |s, h| s.with_resource(h.type_name(), h.schema()));
        self.data_sources
            .values()
            .fold(schema, |s, d| s.with_data_source(d.type_name(), d.schema()))
    }

    fn metadata(&self) -> ProviderMetadata {
        let mut resources: Vec<String> = self.resources.keys().map(|k| k.to_string()).collect();
        let mut data_sources: Vec<String> =
            self.data_sources.keys().map(|k| k.to_string()).collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&KongConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        match KongConfig::from_provider_config(&config) {
            Ok(resolved) => diagnostics.extend(resolved.warnings()),
            Err(err) => diagnostics.push(Diagnostic::error(err.message())),
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = self.validate_provider_config(config.clone()).await?;
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let context = KongContext::new(KongConfig::from_provider_config(&config)?)?;
        match context.client.status().await {
            Ok(_) => info!(admin_uri = context.client.admin_uri(), "connected to Kong"),
            Err(err) => {
                warn!(admin_uri = context.client.admin_uri(), error = %err, "Kong status check failed");
                diagnostics.push(
                    Diagnostic::warning("Kong Admin API is not reachable")
                        .with_detail(err.to_string())
                        .with_attribute("kong_admin_uri"),
                );
            }
        }

        *self.context.write().await = Some(Arc::new(context));
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.context.write().await.take();
        info!("provider stopped");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let handler = self.resource(resource_type)?;
        let mut diagnostics = validate(&handler.schema(), &config);
        diagnostics.extend(handler.validate(&config));
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        let current = handler.schema().version as i64;
        if version > current {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} state version {} is newer than schema version {}",
                resource_type, version, current
            )));
        }
        Ok(state)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config))]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let handler = self.resource(resource_type)?;
        let plan = plan_resource(&handler.schema(), prior_state.as_ref(), &proposed_state);
        debug!(
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "planned"
        );
        Ok(plan)
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        handler.create(&*self.context().await?, planned_state).await
    }

    #[instrument(skip(self, current_state))]
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let handler = self.resource(resource_type)?;
        handler.read(&*self.context().await?, current_state).await
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        handler
            .update(&*self.context().await?, prior_state, planned_state)
            .await
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let handler = self.resource(resource_type)?;
        handler.delete(&*self.context().await?, current_state).await
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let handler = self.resource(resource_type)?;
        let state = handler
            .import(&*self.context().await?, id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} '{}'", resource_type, id)))?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let handler = self.data_source(data_source_type)?;
        let mut diagnostics = validate(&handler.schema(), &config);
        diagnostics.extend(handler.validate(&config));
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.data_source(data_source_type)?;
        handler.read(&*self.context().await?, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        assert_error_contains, assert_plan_changes_attribute, assert_plan_creates,
        assert_plan_no_changes, assert_plan_replaces, ProviderTester, TestError,
    };
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_kong() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"database": {"reachable": true}})))
            .mount(&server)
            .await;
        server
    }

    async fn configured(server: &MockServer) -> ProviderTester<KongProvider> {
        let tester = ProviderTester::new(KongProvider::new());
        tester
            .configure(json!({"kong_admin_uri": server.uri()}))
            .await
            .unwrap();
        tester
    }

    fn kong_service(port: u16) -> Value {
        json!({
            "id": "svc-1",
            "name": "billing",
            "protocol": "http",
            "host": "billing.internal",
            "port": port,
            "path": null,
            "retries": 5,
            "connect_timeout": 60000,
            "write_timeout": 60000,
            "read_timeout": 60000,
            "tags": null
        })
    }

    #[test]
    fn test_schema_covers_every_type() {
        let provider = KongProvider::new();
        let schema = provider.schema();
        assert_eq!(schema.resources.len(), 15);
        assert_eq!(schema.data_sources.len(), 6);
        assert!(schema.provider.block.attributes.contains_key("kong_admin_uri"));

        let metadata = provider.metadata();
        assert!(metadata.capabilities.plan_destroy);
        assert_eq!(metadata.resources.first().map(String::as_str), Some("kong_certificate"));
    }

    #[tokio::test]
    async fn test_operations_before_configure_fail() {
        let tester = ProviderTester::new(KongProvider::new());
        let err = tester
            .create("kong_service", json!({"name": "billing", "host": "h"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_configure_warns_when_kong_is_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = KongProvider::new();
        let diagnostics = provider
            .configure(json!({"kong_admin_uri": server.uri()}))
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].is_error());
        assert!(provider.context().await.is_ok());
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_block() {
        let tester = ProviderTester::new(KongProvider::new());
        let err = tester
            .configure(json!({"kong_admin_uri": "ftp://kong"}))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => assert_error_contains(&diagnostics, "http or https"),
            other => panic!("unexpected error: {}", other),
        }

        let err = tester.configure(json!({"kong_admin_url": "x"})).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported attribute 'kong_admin_url'"));
    }

    #[tokio::test]
    async fn test_configure_sends_admin_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(header("kong-admin-token", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let tester = ProviderTester::new(KongProvider::new());
        tester
            .configure(json!({"kong_admin_uri": server.uri(), "kong_admin_token": "s3cret"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let tester = ProviderTester::new(KongProvider::new());
        tester
            .validate_resource_config("kong_consumer", json!({"username": "alice"}))
            .await
            .unwrap();

        let err = tester
            .validate_resource_config("kong_consumer", json!({"tags": ["a"]}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("username or a custom_id"));

        let err = tester
            .validate_resource_config("kong_gateway", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Provider(ProviderError::UnknownResource(_))));
    }

    #[tokio::test]
    async fn test_service_lifecycle() {
        let server = mock_kong().await;
        Mock::given(method("POST"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_service(80)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_service(8080)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        // Reads see the most recent write.
        Mock::given(method("GET"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_service(80)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/svc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_service(8080)))
            .mount(&server)
            .await;

        let tester = configured(&server).await;
        let config = json!({"name": "billing", "host": "billing.internal"});

        let plan = tester.plan_create("kong_service", config.clone()).await.unwrap();
        assert_plan_creates(&plan);

        let state = tester
            .lifecycle_crud(
                "kong_service",
                config,
                json!({"name": "billing", "host": "billing.internal", "port": 8080}),
            )
            .await
            .unwrap();
        assert_eq!(state["port"], 8080);
    }

    #[tokio::test]
    async fn test_read_gone_resource() {
        let server = mock_kong().await;
        Mock::given(method("GET"))
            .and(path("/routes/route-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not found"})))
            .mount(&server)
            .await;

        let tester = configured(&server).await;
        let state = tester
            .read("kong_route", json!({"id": "route-1", "service_id": "svc-1"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_plan_through_provider() {
        let tester = ProviderTester::new(KongProvider::new());
        let prior = json!({
            "id": "p-1",
            "name": "cors",
            "enabled": true,
            "config_json": null,
            "computed_config": "{}",
            "protocols": ["http"]
        });

        let plan = tester
            .plan_update("kong_plugin", prior.clone(), json!({"name": "cors"}))
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let plan = tester
            .plan_update("kong_plugin", prior.clone(), json!({"name": "acl"}))
            .await
            .unwrap();
        assert_plan_replaces(&plan);
        assert_plan_changes_attribute(&plan, "name");

        let plan = tester.plan_delete("kong_plugin", prior).await.unwrap();
        assert!(plan.planned_state.is_null());
    }

    #[tokio::test]
    async fn test_import_missing_entity() {
        let server = mock_kong().await;
        Mock::given(method("GET"))
            .and(path("/upstreams/up-1/targets/t-9"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not found"})))
            .mount(&server)
            .await;

        let tester = configured(&server).await;
        let err = tester.import_resource("kong_target", "up-1/t-9").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_import_entity() {
        let server = mock_kong().await;
        Mock::given(method("GET"))
            .and(path("/consumers/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "c-1",
                "username": "alice",
                "custom_id": null,
                "tags": null
            })))
            .mount(&server)
            .await;

        let tester = configured(&server).await;
        let imported = tester.import_resource("kong_consumer", "c-1").await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "kong_consumer");
        assert_eq!(imported[0].state["username"], "alice");
    }

    #[tokio::test]
    async fn test_workspace_scoped_requests() {
        let server = mock_kong().await;
        Mock::given(method("GET"))
            .and(path("/team-a/upstreams/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "up-1",
                "name": "orders",
                "algorithm": "round-robin",
                "slots": 10000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tester = ProviderTester::new(KongProvider::new());
        tester
            .configure(json!({"kong_admin_uri": server.uri(), "kong_workspace": "team-a"}))
            .await
            .unwrap();

        tester
            .validate_data_source_config("kong_upstream", json!({"name": "orders"}))
            .await
            .unwrap();
        let state = tester
            .read_data_source("kong_upstream", json!({"name": "orders"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "up-1");
    }

    #[tokio::test]
    async fn test_stop_clears_client() {
        let server = mock_kong().await;
        let tester = configured(&server).await;
        tester.stop().await.unwrap();

        let err = tester
            .read("kong_service", json!({"id": "svc-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_upgrade_rejects_future_state() {
        let tester = ProviderTester::new(KongProvider::new());
        let state = json!({"id": "svc-1"});
        assert_eq!(
            tester
                .upgrade_resource_state("kong_service", 0, state.clone())
                .await
                .unwrap(),
            state
        );
        assert!(tester
            .upgrade_resource_state("kong_service", 3, state)
            .await
            .is_err());
    }
}
