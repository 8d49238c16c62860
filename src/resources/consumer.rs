//! `kong_consumer`: an API client identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{remote_list, KongResource};
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::Consumer;
use crate::schema::{Attribute, Diagnostic, Schema};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerState {
    pub id: Option<String>,
    pub username: Option<String>,
    pub custom_id: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct ConsumerResource;

impl KongResource for ConsumerResource {
    const TYPE_NAME: &'static str = "kong_consumer";
    type State = ConsumerState;
    type Entity = Consumer;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("A Kong consumer: the identity credentials and plugins attach to")
            .with_attribute("id", Attribute::id())
            .with_attribute("username", Attribute::optional_string())
            .with_attribute(
                "custom_id",
                Attribute::optional_string().with_description("Identifier from an external system"),
            )
            .with_attribute("tags", Attribute::tags())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        let set = |key: &str| config.get(key).is_some_and(|v| !v.is_null());
        if set("username") || set("custom_id") {
            Vec::new()
        } else {
            vec![Diagnostic::error("A consumer needs a username or a custom_id")
                .with_detail("Set at least one of 'username' and 'custom_id'")
                .with_attribute("username")]
        }
    }

    fn collection_path(_state: &ConsumerState) -> Result<String, ProviderError> {
        Ok("/consumers".to_string())
    }

    fn state_id(state: &ConsumerState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &ConsumerState, _config: &KongConfig) -> Result<Consumer, ProviderError> {
        Ok(Consumer {
            id: None,
            username: state.username.clone(),
            custom_id: state.custom_id.clone(),
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        consumer: Consumer,
        prior: &ConsumerState,
        _config: &KongConfig,
    ) -> Result<ConsumerState, ProviderError> {
        Ok(ConsumerState {
            id: consumer.id,
            username: consumer.username,
            custom_id: consumer.custom_id,
            tags: remote_list(consumer.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<ConsumerState, ProviderError> {
        Ok(ConsumerState {
            id: Some(id.to_string()),
            ..Default::default()
        })
    }
}
