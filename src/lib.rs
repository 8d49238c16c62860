//! Kong provider
//!
//! A provider plugin that manages Kong API gateway entities (services,
//! routes, consumers, plugins, certificates, SNIs, upstreams, targets,
//! workspaces and consumer credentials) through the Kong Admin API.
//!
//! # Handshake Protocol
//!
//! The binary serves the provider protocol over gRPC on an ephemeral
//! loopback port and announces it on stdout:
//!
//! ```text
//! KONG_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `KONG_PROVIDER|<protocol_version>|<address>`
//!
//! # Provider Protocol
//!
//! - **GetMetadata** / **GetSchema**: resource and data source names and schemas
//! - **ValidateProviderConfig** / **Configure**: the provider block, with
//!   environment variable fallbacks (see [`config`])
//! - **ValidateResourceConfig**, **Plan**, **Create**, **Read**, **Update**,
//!   **Delete**, **ImportResourceState**: resource lifecycle
//! - **ValidateDataSourceConfig** / **ReadDataSource**: lookups of existing entities
//! - **Stop**: drops the Admin API client
//!
//! # Layout
//!
//! - [`kong`]: the Admin API client and wire entities
//! - [`resources`]: one handler per resource type, plus data sources
//! - [`provider`]: [`KongProvider`], dispatching protocol calls to handlers
//! - [`plan`], [`schema`], [`validation`]: schema-driven planning and checks
//! - [`server`]: the gRPC service and handshake

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod kong;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use config::KongConfig;
pub use error::ProviderError;
pub use kong::{KongClient, KongError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::KongProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
