//! Kong resource handlers.
//!
//! Every resource type follows the same shape: a typed state mirroring its
//! schema, a mapping from state to the Kong entity sent on the wire, the
//! collection path the entity lives under, and a mapping from Kong's answer
//! back to state. [`KongResource`] captures that per-type knowledge and
//! [`Handler`] turns it into the create/read/update/delete/import calls the
//! provider dispatches through [`ResourceHandler`].

pub mod certificate;
pub mod consumer;
pub mod credentials;
mod data_sources;
pub mod plugin;
pub mod route;
pub mod service;
pub mod upstream;
pub mod workspace;

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub use data_sources::{data_sources, DataSourceHandler};

use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::Identified;
use crate::kong::{segment, KongClient};
use crate::schema::{Diagnostic, Schema};

/// A configured Admin API client with the settings it was built from.
#[derive(Debug)]
pub struct KongContext {
    pub client: KongClient,
    pub config: KongConfig,
}

impl KongContext {
    pub fn new(config: KongConfig) -> Result<Self, ProviderError> {
        let client = KongClient::new(&config)?;
        Ok(Self { client, config })
    }
}

/// Per-type knowledge of one Kong entity.
pub trait KongResource: Send + Sync + 'static {
    /// The resource type name, e.g. `kong_service`.
    const TYPE_NAME: &'static str;

    /// Kong accepts `PATCH` for this entity. When false every attribute
    /// forces replacement and updates are rejected.
    const UPDATABLE: bool = true;

    /// State as stored by the host; serializes to the schema's shape.
    type State: Serialize + DeserializeOwned + Default + Send + Sync;

    /// Request and response body of the Admin API.
    type Entity: Serialize + DeserializeOwned + Identified + Send + Sync;

    fn schema() -> Schema;

    /// Checks the schema cannot express.
    fn validate(config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Collection the entity lives under, e.g. `/consumers/{id}/acls`.
    fn collection_path(state: &Self::State) -> Result<String, ProviderError>;

    fn state_id(state: &Self::State) -> Option<&str>;

    fn to_entity(state: &Self::State, config: &KongConfig) -> Result<Self::Entity, ProviderError>;

    /// Map Kong's answer to state. `prior` supplies what Kong does not echo
    /// back, such as write-only secrets and parent ids.
    fn to_state(
        entity: Self::Entity,
        prior: &Self::State,
        config: &KongConfig,
    ) -> Result<Self::State, ProviderError>;

    /// Build the minimal state needed to read an imported entity.
    fn import_state(id: &str) -> Result<Self::State, ProviderError>;
}

/// Type-erased resource operations, dispatched by resource type name.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    fn validate(&self, config: &Value) -> Vec<Diagnostic>;

    async fn create(&self, ctx: &KongContext, planned: Value) -> Result<Value, ProviderError>;

    /// Read the remote entity. `None` means it no longer exists.
    async fn read(&self, ctx: &KongContext, state: Value) -> Result<Option<Value>, ProviderError>;

    async fn update(
        &self,
        ctx: &KongContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    async fn delete(&self, ctx: &KongContext, state: Value) -> Result<(), ProviderError>;

    async fn import(&self, ctx: &KongContext, id: &str) -> Result<Option<Value>, ProviderError>;
}

/// Generic [`ResourceHandler`] over a [`KongResource`].
pub struct Handler<R>(PhantomData<fn() -> R>);

impl<R> Handler<R> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<R> Default for Handler<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: KongResource> Handler<R> {
    fn entity_path(state: &R::State) -> Result<String, ProviderError> {
        let id = R::state_id(state).ok_or_else(|| {
            ProviderError::Validation(format!("{} state has no id", R::TYPE_NAME))
        })?;
        Ok(format!("{}/{}", R::collection_path(state)?, segment(id)))
    }

    fn finish(
        entity: R::Entity,
        prior: &R::State,
        config: &KongConfig,
    ) -> Result<Value, ProviderError> {
        let state = R::to_state(entity, prior, config)?;
        Ok(serde_json::to_value(state)?)
    }
}

#[async_trait]
impl<R: KongResource> ResourceHandler for Handler<R> {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        R::schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        R::validate(config)
    }

    async fn create(&self, ctx: &KongContext, planned: Value) -> Result<Value, ProviderError> {
        let state: R::State = serde_json::from_value(planned)?;
        let path = R::collection_path(&state)?;
        let entity = R::to_entity(&state, &ctx.config)?;

        let created: R::Entity = ctx.client.create(&path, &entity).await?;
        info!(resource = R::TYPE_NAME, id = created.id(), "created entity");
        Self::finish(created, &state, &ctx.config)
    }

    async fn read(&self, ctx: &KongContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: R::State = serde_json::from_value(state)?;
        let path = Self::entity_path(&state)?;

        match ctx.client.get::<R::Entity>(&path).await? {
            Some(entity) => Self::finish(entity, &state, &ctx.config).map(Some),
            None => {
                info!(resource = R::TYPE_NAME, path, "entity is gone");
                Ok(None)
            }
        }
    }

    async fn update(
        &self,
        ctx: &KongContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        if !R::UPDATABLE {
            return Err(ProviderError::Validation(format!(
                "{} cannot be updated in place",
                R::TYPE_NAME
            )));
        }

        let prior: R::State = serde_json::from_value(prior)?;
        let planned: R::State = serde_json::from_value(planned)?;
        let path = Self::entity_path(&prior)?;
        let entity = R::to_entity(&planned, &ctx.config)?;

        let updated: R::Entity = ctx.client.update(&path, &entity).await?;
        info!(resource = R::TYPE_NAME, id = updated.id(), "updated entity");
        Self::finish(updated, &planned, &ctx.config)
    }

    async fn delete(&self, ctx: &KongContext, state: Value) -> Result<(), ProviderError> {
        let state: R::State = serde_json::from_value(state)?;
        let path = Self::entity_path(&state)?;
        ctx.client.delete(&path).await?;
        info!(resource = R::TYPE_NAME, path, "deleted entity");
        Ok(())
    }

    async fn import(&self, ctx: &KongContext, id: &str) -> Result<Option<Value>, ProviderError> {
        debug!(resource = R::TYPE_NAME, id, "importing entity");
        let state = serde_json::to_value(R::import_state(id)?)?;
        self.read(ctx, state).await
    }
}

/// All resource handlers served by the provider.
pub fn resources() -> Vec<Box<dyn ResourceHandler>> {
    vec![
        Box::new(Handler::<service::ServiceResource>::new()),
        Box::new(Handler::<route::RouteResource>::new()),
        Box::new(Handler::<consumer::ConsumerResource>::new()),
        Box::new(Handler::<plugin::PluginResource>::new()),
        Box::new(Handler::<plugin::ConsumerPluginConfigResource>::new()),
        Box::new(Handler::<certificate::CertificateResource>::new()),
        Box::new(Handler::<certificate::SniResource>::new()),
        Box::new(Handler::<upstream::UpstreamResource>::new()),
        Box::new(Handler::<upstream::TargetResource>::new()),
        Box::new(Handler::<workspace::WorkspaceResource>::new()),
        Box::new(Handler::<credentials::BasicAuthResource>::new()),
        Box::new(Handler::<credentials::KeyAuthResource>::new()),
        Box::new(Handler::<credentials::JwtAuthResource>::new()),
        Box::new(Handler::<credentials::AclResource>::new()),
        Box::new(Handler::<credentials::OAuth2Resource>::new()),
    ]
}

/// Split a `parent_id/entity_id` import id.
pub(crate) fn split_import_id<'a>(
    resource: &str,
    id: &'a str,
) -> Result<(&'a str, &'a str), ProviderError> {
    match id.split_once('/') {
        Some((parent, child)) if !parent.is_empty() && !child.is_empty() && !child.contains('/') => {
            Ok((parent, child))
        }
        _ => Err(ProviderError::Validation(format!(
            "{} import id must be '<parent_id>/<id>', got '{}'",
            resource, id
        ))),
    }
}

/// A required parent id, as a path segment.
pub(crate) fn parent_id<'a>(
    resource: &str,
    attribute: &str,
    value: &'a Option<String>,
) -> Result<&'a str, ProviderError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::Validation(format!("{} requires {}", resource, attribute)))
}

/// Kong answers `[]` or `null` for unset lists; keep whichever the state had.
pub(crate) fn remote_list<T>(remote: Option<Vec<T>>, prior: Option<&Vec<T>>) -> Option<Vec<T>> {
    match remote {
        Some(items) if !items.is_empty() => Some(items),
        _ if prior.is_some_and(|p| p.is_empty()) => Some(Vec::new()),
        _ => None,
    }
}

/// Error diagnostic when an integer attribute lies outside `min..=max`.
pub(crate) fn check_range(
    config: &Value,
    attribute: &str,
    min: i64,
    max: i64,
) -> Option<Diagnostic> {
    let value = config.get(attribute)?.as_i64()?;
    if (min..=max).contains(&value) {
        return None;
    }
    Some(
        invalid(format!("Invalid value '{}' for '{}'", value, attribute), attribute)
            .with_detail(format!("Expected a value between {} and {}", min, max)),
    )
}

/// Error diagnostic for a configuration that violates a cross-field rule.
pub(crate) fn invalid(summary: impl Into<String>, attribute: &str) -> Diagnostic {
    Diagnostic::error(summary).with_attribute(attribute)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_import_id() {
        assert_eq!(
            split_import_id("kong_target", "up-1/t-1").unwrap(),
            ("up-1", "t-1")
        );
        for bad in ["t-1", "/t-1", "up-1/", "a/b/c"] {
            let err = split_import_id("kong_target", bad).unwrap_err();
            assert!(err.to_string().contains("<parent_id>/<id>"), "{}", bad);
        }
    }

    #[test]
    fn test_entity_path_encodes_ids() {
        let acl = credentials::AclState {
            id: Some("acl#1".to_string()),
            consumer_id: Some("bob?x".to_string()),
            ..Default::default()
        };
        assert_eq!(
            Handler::<credentials::AclResource>::entity_path(&acl).unwrap(),
            "/consumers/bob%3Fx/acls/acl%231"
        );

        let target = upstream::TargetState {
            id: Some("t-1".to_string()),
            upstream_id: Some("orders pool".to_string()),
            ..Default::default()
        };
        assert_eq!(
            Handler::<upstream::TargetResource>::entity_path(&target).unwrap(),
            "/upstreams/orders%20pool/targets/t-1"
        );
    }

    #[test]
    fn test_check_range() {
        let config = serde_json::json!({"port": 70000, "retries": 3, "name": "x"});
        let diagnostic = check_range(&config, "port", 0, 65535).unwrap();
        assert_eq!(diagnostic.attribute.as_deref(), Some("port"));
        assert!(diagnostic.summary.contains("70000"));
        assert!(check_range(&config, "retries", 0, 32767).is_none());
        assert!(check_range(&config, "name", 0, 1).is_none());
        assert!(check_range(&config, "missing", 0, 1).is_none());
    }

    #[test]
    fn test_remote_list() {
        assert_eq!(remote_list::<String>(None, None), None);
        assert_eq!(remote_list::<String>(Some(vec![]), None), None);
        assert_eq!(remote_list::<String>(Some(vec![]), Some(&vec![])), Some(vec![]));
        assert_eq!(
            remote_list(Some(vec!["a".to_string()]), None),
            Some(vec!["a".to_string()])
        );
    }

    #[test]
    fn test_parent_id() {
        assert_eq!(
            parent_id("kong_consumer_acl", "consumer_id", &Some("c-1".to_string())).unwrap(),
            "c-1"
        );
        assert!(parent_id("kong_consumer_acl", "consumer_id", &Some(String::new())).is_err());
        assert!(parent_id("kong_consumer_acl", "consumer_id", &None).is_err());
    }

    #[test]
    fn test_resource_names_are_unique() {
        let mut names: Vec<_> = resources().iter().map(|h| h.type_name()).collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
        assert_eq!(count, 15);
    }

    #[test]
    fn test_resource_schemas_have_computed_id() {
        for handler in resources() {
            let schema = handler.schema();
            let id = schema
                .attribute("id")
                .unwrap_or_else(|| panic!("{} has no id", handler.type_name()));
            assert!(id.flags.is_computed_only(), "{}", handler.type_name());
        }
    }
}
