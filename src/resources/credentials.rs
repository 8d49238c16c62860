//! Consumer credentials: basic-auth, key-auth, JWT, ACL groups and OAuth2
//! applications. Each lives under `/consumers/{consumer_id}/{kind}` and is
//! imported as `consumer_id/credential_id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{invalid, parent_id, remote_list, split_import_id, KongResource};
use crate::config::KongConfig;
use crate::error::ProviderError;
use crate::kong::entities::{
    AclGroup, BasicAuthCredential, JwtCredential, KeyAuthCredential, OAuth2Credential,
};
use crate::kong::segment;
use crate::schema::{Attribute, Diagnostic, Schema};

const JWT_ALGORITHMS: &[&str] = &[
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384",
];

fn consumer_path(resource: &str, consumer_id: &Option<String>, kind: &str) -> Result<String, ProviderError> {
    let consumer = parent_id(resource, "consumer_id", consumer_id)?;
    Ok(format!("/consumers/{}/{}", segment(consumer), kind))
}

fn consumer_attribute() -> Attribute {
    Attribute::required_string()
        .with_force_new()
        .with_description("Consumer owning the credential")
}

fn required(resource: &str, value: &Option<String>, name: &str) -> Result<String, ProviderError> {
    value
        .clone()
        .ok_or_else(|| ProviderError::Validation(format!("{} requires {}", resource, name)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicAuthState {
    pub id: Option<String>,
    pub consumer_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct BasicAuthResource;

impl KongResource for BasicAuthResource {
    const TYPE_NAME: &'static str = "kong_consumer_basic_auth";
    type State = BasicAuthState;
    type Entity = BasicAuthCredential;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::id())
            .with_attribute("consumer_id", consumer_attribute())
            .with_attribute("username", Attribute::required_string())
            .with_attribute(
                "password",
                Attribute::required_string()
                    .sensitive()
                    .with_description("Plain text password; Kong only stores its hash"),
            )
            .with_attribute("tags", Attribute::tags())
    }

    fn collection_path(state: &BasicAuthState) -> Result<String, ProviderError> {
        consumer_path(Self::TYPE_NAME, &state.consumer_id, "basic-auth")
    }

    fn state_id(state: &BasicAuthState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &BasicAuthState, _config: &KongConfig) -> Result<BasicAuthCredential, ProviderError> {
        Ok(BasicAuthCredential {
            id: None,
            username: required(Self::TYPE_NAME, &state.username, "username")?,
            password: state.password.clone(),
            consumer: None,
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        credential: BasicAuthCredential,
        prior: &BasicAuthState,
        _config: &KongConfig,
    ) -> Result<BasicAuthState, ProviderError> {
        Ok(BasicAuthState {
            id: credential.id,
            consumer_id: credential.consumer.map(|c| c.id).or_else(|| prior.consumer_id.clone()),
            username: Some(credential.username),
            // Kong answers with the hash.
            password: prior.password.clone(),
            tags: remote_list(credential.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<BasicAuthState, ProviderError> {
        let (consumer, credential) = split_import_id(Self::TYPE_NAME, id)?;
        Ok(BasicAuthState {
            id: Some(credential.to_string()),
            consumer_id: Some(consumer.to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyAuthState {
    pub id: Option<String>,
    pub consumer_id: Option<String>,
    pub key: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct KeyAuthResource;

impl KongResource for KeyAuthResource {
    const TYPE_NAME: &'static str = "kong_consumer_key_auth";
    type State = KeyAuthState;
    type Entity = KeyAuthCredential;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::id())
            .with_attribute("consumer_id", consumer_attribute())
            .with_attribute(
                "key",
                Attribute::optional_computed_string()
                    .sensitive()
                    .with_description("API key; Kong generates one when unset"),
            )
            .with_attribute("tags", Attribute::tags())
    }

    fn collection_path(state: &KeyAuthState) -> Result<String, ProviderError> {
        consumer_path(Self::TYPE_NAME, &state.consumer_id, "key-auth")
    }

    fn state_id(state: &KeyAuthState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &KeyAuthState, _config: &KongConfig) -> Result<KeyAuthCredential, ProviderError> {
        Ok(KeyAuthCredential {
            id: None,
            key: state.key.clone(),
            consumer: None,
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        credential: KeyAuthCredential,
        prior: &KeyAuthState,
        _config: &KongConfig,
    ) -> Result<KeyAuthState, ProviderError> {
        Ok(KeyAuthState {
            id: credential.id,
            consumer_id: credential.consumer.map(|c| c.id).or_else(|| prior.consumer_id.clone()),
            key: credential.key,
            tags: remote_list(credential.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<KeyAuthState, ProviderError> {
        let (consumer, credential) = split_import_id(Self::TYPE_NAME, id)?;
        Ok(KeyAuthState {
            id: Some(credential.to_string()),
            consumer_id: Some(consumer.to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtAuthState {
    pub id: Option<String>,
    pub consumer_id: Option<String>,
    pub key: Option<String>,
    pub algorithm: Option<String>,
    pub rsa_public_key: Option<String>,
    pub secret: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct JwtAuthResource;

impl KongResource for JwtAuthResource {
    const TYPE_NAME: &'static str = "kong_consumer_jwt_auth";
    type State = JwtAuthState;
    type Entity = JwtCredential;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::id())
            .with_attribute("consumer_id", consumer_attribute())
            .with_attribute(
                "key",
                Attribute::optional_computed_string().with_description("Value matched against the iss claim"),
            )
            .with_attribute(
                "algorithm",
                Attribute::optional_string()
                    .with_default(json!("HS256"))
                    .with_allowed_values(JWT_ALGORITHMS.iter().copied()),
            )
            .with_attribute("rsa_public_key", Attribute::optional_string())
            .with_attribute("secret", Attribute::optional_computed_string().sensitive())
            .with_attribute("tags", Attribute::tags())
    }

    fn validate(config: &Value) -> Vec<Diagnostic> {
        let algorithm = config.get("algorithm").and_then(Value::as_str).unwrap_or("HS256");
        let has_key = config
            .get("rsa_public_key")
            .and_then(Value::as_str)
            .is_some_and(|k| !k.is_empty());
        let asymmetric = algorithm.starts_with("RS") || algorithm.starts_with("ES");

        if asymmetric && !has_key {
            vec![invalid(
                format!("'rsa_public_key' is required for the {} algorithm", algorithm),
                "rsa_public_key",
            )]
        } else {
            Vec::new()
        }
    }

    fn collection_path(state: &JwtAuthState) -> Result<String, ProviderError> {
        consumer_path(Self::TYPE_NAME, &state.consumer_id, "jwt")
    }

    fn state_id(state: &JwtAuthState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &JwtAuthState, _config: &KongConfig) -> Result<JwtCredential, ProviderError> {
        Ok(JwtCredential {
            id: None,
            key: state.key.clone(),
            algorithm: state.algorithm.clone(),
            rsa_public_key: state.rsa_public_key.clone(),
            secret: state.secret.clone(),
            consumer: None,
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        credential: JwtCredential,
        prior: &JwtAuthState,
        _config: &KongConfig,
    ) -> Result<JwtAuthState, ProviderError> {
        Ok(JwtAuthState {
            id: credential.id,
            consumer_id: credential.consumer.map(|c| c.id).or_else(|| prior.consumer_id.clone()),
            key: credential.key,
            algorithm: credential.algorithm,
            rsa_public_key: credential.rsa_public_key,
            secret: credential.secret,
            tags: remote_list(credential.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<JwtAuthState, ProviderError> {
        let (consumer, credential) = split_import_id(Self::TYPE_NAME, id)?;
        Ok(JwtAuthState {
            id: Some(credential.to_string()),
            consumer_id: Some(consumer.to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclState {
    pub id: Option<String>,
    pub consumer_id: Option<String>,
    pub group: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct AclResource;

impl KongResource for AclResource {
    const TYPE_NAME: &'static str = "kong_consumer_acl";
    type State = AclState;
    type Entity = AclGroup;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::id())
            .with_attribute("consumer_id", consumer_attribute())
            .with_attribute("group", Attribute::required_string())
            .with_attribute("tags", Attribute::tags())
    }

    fn collection_path(state: &AclState) -> Result<String, ProviderError> {
        consumer_path(Self::TYPE_NAME, &state.consumer_id, "acls")
    }

    fn state_id(state: &AclState) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &AclState, _config: &KongConfig) -> Result<AclGroup, ProviderError> {
        Ok(AclGroup {
            id: None,
            group: required(Self::TYPE_NAME, &state.group, "group")?,
            consumer: None,
            tags: state.tags.clone(),
        })
    }

    fn to_state(group: AclGroup, prior: &AclState, _config: &KongConfig) -> Result<AclState, ProviderError> {
        Ok(AclState {
            id: group.id,
            consumer_id: group.consumer.map(|c| c.id).or_else(|| prior.consumer_id.clone()),
            group: Some(group.group),
            tags: remote_list(group.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<AclState, ProviderError> {
        let (consumer, group) = split_import_id(Self::TYPE_NAME, id)?;
        Ok(AclState {
            id: Some(group.to_string()),
            consumer_id: Some(consumer.to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2State {
    pub id: Option<String>,
    pub consumer_id: Option<String>,
    pub name: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub hash_secret: Option<bool>,
    pub redirect_uris: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

pub struct OAuth2Resource;

impl KongResource for OAuth2Resource {
    const TYPE_NAME: &'static str = "kong_consumer_oauth2";
    type State = OAuth2State;
    type Entity = OAuth2Credential;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("An OAuth2 application registered for a consumer")
            .with_attribute("id", Attribute::id())
            .with_attribute("consumer_id", consumer_attribute())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("client_id", Attribute::optional_computed_string())
            .with_attribute("client_secret", Attribute::optional_computed_string().sensitive())
            .with_attribute("hash_secret", Attribute::optional_bool().with_default(json!(false)))
            .with_attribute("redirect_uris", Attribute::required_string_list())
            .with_attribute("tags", Attribute::tags())
    }

    fn collection_path(state: &OAuth2State) -> Result<String, ProviderError> {
        consumer_path(Self::TYPE_NAME, &state.consumer_id, "oauth2")
    }

    fn state_id(state: &OAuth2State) -> Option<&str> {
        state.id.as_deref()
    }

    fn to_entity(state: &OAuth2State, _config: &KongConfig) -> Result<OAuth2Credential, ProviderError> {
        Ok(OAuth2Credential {
            id: None,
            name: required(Self::TYPE_NAME, &state.name, "name")?,
            client_id: state.client_id.clone(),
            client_secret: state.client_secret.clone(),
            hash_secret: state.hash_secret,
            redirect_uris: state.redirect_uris.clone(),
            consumer: None,
            tags: state.tags.clone(),
        })
    }

    fn to_state(
        credential: OAuth2Credential,
        prior: &OAuth2State,
        _config: &KongConfig,
    ) -> Result<OAuth2State, ProviderError> {
        // A hashed secret cannot be read back; keep the configured one.
        let client_secret = match (credential.hash_secret, &prior.client_secret) {
            (Some(true), Some(secret)) => Some(secret.clone()),
            _ => credential.client_secret,
        };

        Ok(OAuth2State {
            id: credential.id,
            consumer_id: credential.consumer.map(|c| c.id).or_else(|| prior.consumer_id.clone()),
            name: Some(credential.name),
            client_id: credential.client_id,
            client_secret,
            hash_secret: credential.hash_secret,
            redirect_uris: credential.redirect_uris,
            tags: remote_list(credential.tags, prior.tags.as_ref()),
        })
    }

    fn import_state(id: &str) -> Result<OAuth2State, ProviderError> {
        let (consumer, credential) = split_import_id(Self::TYPE_NAME, id)?;
        Ok(OAuth2State {
            id: Some(credential.to_string()),
            consumer_id: Some(consumer.to_string()),
            ..Default::default()
        })
    }
}
