//! `kong_workspace`: an Enterprise workspace. Workspaces are global, so
//! their paths are never workspace-prefixed.

use serde::{Deserialize, Serialize};

use super::KongResource;
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::Workspace;
use crate::schema::{Attribute, Schema};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceState {
    pub id: Option<String>,
    pub name: Option<String>,
    pub comment: Option<String>,
}

pub struct WorkspaceResource;

impl KongResource for WorkspaceResource {
    const TYPE_NAME: &'static str = "kong_workspace";
    type State = WorkspaceState;
    type Entity = Workspace;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::id())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("comment", Attribute::optional_string())
    }

    fn collection_path(_state: &WorkspaceState) -> Result<String, ProviderError> {
        Ok("/workspaces".to_string())
    }

    fn state_id(state: &WorkspaceState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &WorkspaceState, _config: &KongConfig) -> Result<Workspace, ProviderError> {
        let name = state
            .name
            .clone()
            .ok_or_else(|| ProviderError::Validation("kong_workspace requires name".to_string()))?;
        Ok(Workspace {
            id: None,
            name,
            comment: state.comment.clone(),
        })
    }

    fn to_state(
        workspace: Workspace,
        _prior: &WorkspaceState,
        _config: &KongConfig,
    ) -> Result<WorkspaceState, ProviderError> {
        Ok(WorkspaceState {
            id: workspace.id,
            name: Some(workspace.name),
            comment: workspace.comment,
        })
    }

    fn import_state(id: &str) -> Result<WorkspaceState, ProviderError> {
        Ok(WorkspaceState {
            id: Some(id.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::context_with;
    use crate::resources::{Handler, ResourceHandler};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_workspace_paths_ignore_configured_workspace() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/workspaces"))
            .and(body_json(json!({"name": "team-a", "comment": "payments"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "ws-1",
                "name": "team-a",
                "comment": "payments",
                "config": {},
                "meta": {}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/workspaces/ws-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ws-1",
                "name": "team-a",
                "comment": null
            })))
            .mount(&server)
            .await;

        let ctx = context_with(
            &server,
            KongConfig {
                workspace: Some("default".to_string()),
                ..Default::default()
            },
        );
        let handler = Handler::<WorkspaceResource>::new();
        let state = handler
            .create(&ctx, json!({"name": "team-a", "comment": "payments"}))
            .await
            .unwrap();
        assert_eq!(state, json!({"id": "ws-1", "name": "team-a", "comment": "payments"}));

        let read = handler.read(&ctx, state).await.unwrap().unwrap();
        assert!(read["comment"].is_null());
    }
}
