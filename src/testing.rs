//! Test harness driving a [`ProviderService`] without a gRPC server.
//!
//! ```ignore
//! let tester = ProviderTester::new(KongProvider::new());
//! tester.configure(json!({"kong_admin_uri": server.uri()})).await?;
//! let state = tester
//!     .lifecycle_create("kong_consumer", json!({"username": "alice"}))
//!     .await?;
//! ```

use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Calls a provider the way the host would, one protocol operation at a time.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Error diagnostics come back as [`TestError::Diagnostics`]; warnings are dropped.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.provider.validate_provider_config(config).await?)
    }

    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.provider.configure(config).await?)
    }

    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        check_diagnostics(
            self.provider
                .validate_resource_config(resource_type, config)
                .await?,
        )
    }

    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        check_diagnostics(
            self.provider
                .validate_data_source_config(data_source_type, config)
                .await?,
        )
    }

    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Read a resource that must still exist.
    async fn refresh(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} disappeared after apply", resource_type))
        })
    }

    /// plan → create → read. Returns the refreshed state.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.refresh(resource_type, created).await
    }

    /// plan → update → read. Returns the refreshed state.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        if plan.requires_replace {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} update requires replacement",
                resource_type
            )));
        }
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.refresh(resource_type, updated).await
    }

    /// plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let plan = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        if !plan.planned_state.is_null() {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} destroy plan kept a state",
                resource_type
            )));
        }
        self.delete(resource_type, current_state).await
    }

    /// create → update → delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Failure of a diagnostics-returning operation.
#[derive(Debug)]
pub enum TestError {
    /// The operation returned error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation itself failed.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "{} error diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  {}", diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    if has_errors(&diagnostics) {
        Err(TestError::Diagnostics(
            diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        ))
    } else {
        Ok(())
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Panics unless the plan creates something without replacing.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        changed_paths(plan)
    );
}

pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(plan.has_changes(), "Expected plan to have changes, but got no changes");
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        changed_paths(plan)
    );
}

pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Panics unless some error diagnostic's summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let errors: Vec<&str> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .map(|d| d.summary.as_str())
        .collect();

    assert!(
        errors.iter().any(|summary| summary.contains(substring)),
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        errors
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KongProvider;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kong_route(paths: &[&str]) -> Value {
        json!({
            "id": "route-1",
            "name": "orders",
            "protocols": ["http", "https"],
            "methods": null,
            "hosts": null,
            "paths": paths,
            "https_redirect_status_code": 426,
            "regex_priority": 0,
            "strip_path": true,
            "preserve_host": false,
            "request_buffering": true,
            "response_buffering": true,
            "path_handling": "v0",
            "service": {"id": "svc-1"},
            "tags": null
        })
    }

    async fn tester_for(server: &MockServer) -> ProviderTester<KongProvider> {
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        let tester = ProviderTester::new(KongProvider::new());
        tester
            .configure(json!({"kong_admin_uri": server.uri()}))
            .await
            .unwrap();
        tester
    }

    #[test]
    fn test_check_diagnostics_ignores_warnings() {
        assert!(check_diagnostics(vec![Diagnostic::warning("tls")]).is_ok());

        let err = check_diagnostics(vec![
            Diagnostic::warning("tls"),
            Diagnostic::error("bad port").with_attribute("port"),
        ])
        .unwrap_err();
        match err {
            TestError::Diagnostics(errors) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Missing required attribute 'host'").with_attribute("host"),
            Diagnostic::error("Invalid value").with_detail("Expected one of: http, https"),
        ]);

        let display = err.to_string();
        assert!(display.contains("'host' (at host)"));
        assert!(display.contains("Expected one of: http, https"));
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![
            Diagnostic::warning("Incomplete basic auth credentials"),
            Diagnostic::error("Unsupported attribute 'kong_admin_url'"),
        ];
        assert_error_contains(&diagnostics, "kong_admin_url");
    }

    #[test]
    #[should_panic(expected = "Expected an error containing")]
    fn test_assert_error_contains_skips_warnings() {
        let diagnostics = vec![Diagnostic::warning("Incomplete basic auth credentials")];
        assert_error_contains(&diagnostics, "basic auth");
    }

    #[tokio::test]
    async fn test_route_lifecycle() {
        let server = MockServer::start().await;
        let tester = tester_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/routes"))
            .and(body_partial_json(json!({"paths": ["/orders"], "service": {"id": "svc-1"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(kong_route(&["/orders"])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/routes/route-1"))
            .and(body_partial_json(json!({"paths": ["/orders", "/v2/orders"]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(kong_route(&["/orders", "/v2/orders"])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/routes/route-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kong_route(&["/orders"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/routes/route-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(kong_route(&["/orders", "/v2/orders"])),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/routes/route-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({
            "name": "orders",
            "protocols": ["http", "https"],
            "paths": ["/orders"],
            "service_id": "svc-1"
        });
        let created = tester
            .lifecycle_create("kong_route", config.clone())
            .await
            .unwrap();
        assert_eq!(created["id"], "route-1");

        assert_plan_no_changes(&tester.plan_update("kong_route", created.clone(), config).await.unwrap());

        let updated_config = json!({
            "name": "orders",
            "protocols": ["http", "https"],
            "paths": ["/orders", "/v2/orders"],
            "service_id": "svc-1"
        });
        let plan = tester
            .plan_update("kong_route", created.clone(), updated_config.clone())
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "paths");
        assert_plan_does_not_change_attribute(&plan, "id");

        let updated = tester
            .lifecycle_update("kong_route", created, updated_config)
            .await
            .unwrap();
        assert_eq!(updated["paths"], json!(["/orders", "/v2/orders"]));

        tester.lifecycle_delete("kong_route", updated).await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_update_refuses_replacement() {
        let server = MockServer::start().await;
        let tester = tester_for(&server).await;

        let prior = json!({"id": "ws-1", "name": "team-a", "comment": null});
        let err = tester
            .lifecycle_update("kong_workspace", prior, json!({"name": "team-b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_create_detects_vanished_entity() {
        let server = MockServer::start().await;
        let tester = tester_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/consumers"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "c-1",
                "username": "alice"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consumers/c-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not found"})))
            .mount(&server)
            .await;

        let err = tester
            .lifecycle_create("kong_consumer", json!({"username": "alice"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_validate_provider_config_reports_errors() {
        let tester = ProviderTester::new(KongProvider::new());
        assert!(tester.schema().provider.attribute("kong_workspace").is_some());

        tester
            .validate_provider_config(json!({"kong_admin_uri": "https://kong:8444"}))
            .await
            .unwrap();

        let err = tester
            .validate_provider_config(json!({"tls_skip_verify": "yes"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(_)));
    }
}
