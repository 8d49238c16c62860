//! Lookup data sources: read an existing entity by id or by name.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{certificate, consumer, route, service, upstream, workspace, KongContext, KongResource};
use crate::error::ProviderError;
use crate::kong::segment;
use crate::schema::{Diagnostic, Schema};

/// Type-erased data source operations.
#[async_trait]
pub trait DataSourceHandler: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    fn validate(&self, config: &Value) -> Vec<Diagnostic>;

    async fn read(&self, ctx: &KongContext, config: Value) -> Result<Value, ProviderError>;
}

/// Looks a [`KongResource`] up by the first of `keys` set in the
/// configuration. Keys in `filters` are matched with a querystring filter on
/// the collection; the others go through Kong's `/{collection}/{id_or_name}`
/// endpoint.
struct Lookup<R> {
    keys: &'static [&'static str],
    filters: &'static [&'static str],
    _resource: PhantomData<fn() -> R>,
}

impl<R: KongResource> Lookup<R> {
    fn boxed(keys: &'static [&'static str]) -> Box<dyn DataSourceHandler> {
        Self::with_filters(keys, &[])
    }

    fn with_filters(
        keys: &'static [&'static str],
        filters: &'static [&'static str],
    ) -> Box<dyn DataSourceHandler> {
        Box::new(Self {
            keys,
            filters,
            _resource: PhantomData,
        })
    }

    async fn find(
        &self,
        ctx: &KongContext,
        collection: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<R::Entity>, ProviderError> {
        if !self.filters.contains(&key) {
            let path = format!("{}/{}", collection, segment(value));
            return Ok(ctx.client.get(&path).await?);
        }

        let mut matches: Vec<R::Entity> = ctx.client.list(collection, &[(key, value)]).await?;
        if matches.len() > 1 {
            return Err(ProviderError::Validation(format!(
                "{} '{}' matches {} {} entities",
                key,
                value,
                matches.len(),
                R::TYPE_NAME
            )));
        }
        Ok(matches.pop())
    }

    fn lookup_key<'a>(&self, config: &'a Value) -> Option<(&'static str, &'a str)> {
        self.keys.iter().find_map(|key| {
            config
                .get(*key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(|v| (*key, v))
        })
    }
}

#[async_trait]
impl<R: KongResource> DataSourceHandler for Lookup<R> {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        R::schema().into_data_source(self.keys)
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        match self.lookup_key(config) {
            Some((key, value)) if value.contains('/') && !self.filters.contains(&key) => {
                vec![Diagnostic::error(format!("'{}' must not contain '/'", key)).with_attribute(key)]
            }
            Some(_) => Vec::new(),
            None => vec![Diagnostic::error(format!(
                "{} needs one of: {}",
                R::TYPE_NAME,
                self.keys.join(", ")
            ))],
        }
    }

    async fn read(&self, ctx: &KongContext, config: Value) -> Result<Value, ProviderError> {
        if let Some(diagnostic) = self.validate(&config).into_iter().next() {
            return Err(ProviderError::Validation(diagnostic.summary));
        }
        let (key, value) = self.lookup_key(&config).ok_or_else(|| {
            ProviderError::Validation(format!("{} needs a lookup key", R::TYPE_NAME))
        })?;

        let default = R::State::default();
        let collection = R::collection_path(&default)?;
        debug!(data_source = R::TYPE_NAME, key, value, "looking up entity");

        let entity = self
            .find(ctx, &collection, key, value)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("{} with {} '{}'", R::TYPE_NAME, key, value))
            })?;
        let state = R::to_state(entity, &default, &ctx.config)?;
        Ok(serde_json::to_value(state)?)
    }
}

/// All data sources served by the provider.
pub fn data_sources() -> Vec<Box<dyn DataSourceHandler>> {
    vec![
        Lookup::<service::ServiceResource>::boxed(&["id", "name"]),
        Lookup::<route::RouteResource>::boxed(&["id", "name"]),
        Lookup::<consumer::ConsumerResource>::with_filters(
            &["id", "username", "custom_id"],
            &["custom_id"],
        ),
        Lookup::<upstream::UpstreamResource>::boxed(&["id", "name"]),
        Lookup::<certificate::CertificateResource>::boxed(&["id"]),
        Lookup::<workspace::WorkspaceResource>::boxed(&["id", "name"]),
    ]
}
