//! Hemmer provider for Squadcast.
//!
//! Manages Squadcast webforms, v2 schedules and schedule rotations, and looks
//! up legacy schedules, over the Hemmer provider protocol (gRPC).
//!
//! # Layout
//!
//! - [`server`]: protocol plumbing and the [`ProviderService`] trait
//! - [`provider`]: [`SquadcastProvider`], dispatching to the resource registry
//! - [`resources`]: one module per resource or data source type
//! - [`api`]: REST and GraphQL client for the Squadcast API
//! - [`codec`]: schema-driven conversion between typed models and configuration trees
//! - [`plan`]: drift detection
//! - [`schema`] and [`validation`]: attribute schemas and their checks
//!
//! # Handshake
//!
//! [`serve`] prints one line to stdout once the gRPC server listens:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! The host connects to that address. Logs go to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
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
#[rustfmt::skip]
pub mod generated;

pub use config::{ProviderConfig, Region};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::SquadcastProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
