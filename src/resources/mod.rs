//! Resource and data source implementations.
//!
//! Each resource owns its schema and translates between its typed state model
//! and the platform API. The [`Registry`] maps host type names to
//! implementations.

mod schedule;
mod schedule_rotation_v2;
mod schedule_v2;
mod webform;

pub use schedule::{Schedule, ScheduleDataSource};
pub use schedule_rotation_v2::ScheduleRotationV2;
pub use schedule_v2::ScheduleV2;
pub use webform::Webform;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::Client;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

/// A managed resource type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name used in configuration, e.g. `squadcast_webform`.
    fn type_name(&self) -> &'static str;

    /// Resource schema.
    fn schema(&self) -> Schema;

    /// Rules spanning several attributes, run after schema validation passes.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the remote object and return its state.
    async fn create(&self, client: &Client, planned: &Value) -> Result<Value, ProviderError>;

    /// Refresh state. `None` means the remote object no longer exists.
    async fn read(&self, client: &Client, current: &Value) -> Result<Option<Value>, ProviderError>;

    /// Apply an in-place update and return the new state.
    async fn update(
        &self,
        client: &Client,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object. Deleting an object that is already gone succeeds.
    async fn delete(&self, client: &Client, current: &Value) -> Result<(), ProviderError>;

    /// Build full state from an import id.
    async fn import(&self, client: &Client, id: &str) -> Result<Value, ProviderError>;
}

/// A read-only data source type.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Type name used in configuration.
    fn type_name(&self) -> &'static str;

    /// Data source schema.
    fn schema(&self) -> Schema;

    /// Look up the data described by `config`.
    async fn read(&self, client: &Client, config: &Value) -> Result<Value, ProviderError>;
}

/// All resource and data source types offered by the provider.
pub struct Registry {
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with every built-in type.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_resource(Box::new(Schedule));
        registry.register_resource(Box::new(Webform));
        registry.register_resource(Box::new(ScheduleV2));
        registry.register_resource(Box::new(ScheduleRotationV2));
        registry.register_data_source(Box::new(ScheduleDataSource));
        registry
    }

    /// Registry without any types.
    pub fn empty() -> Self {
        Self {
            resources: BTreeMap::new(),
            data_sources: BTreeMap::new(),
        }
    }

    /// Add a resource type, replacing one with the same name.
    pub fn register_resource(&mut self, resource: Box<dyn Resource>) {
        self.resources.insert(resource.type_name(), resource);
    }

    /// Add a data source type, replacing one with the same name.
    pub fn register_data_source(&mut self, data_source: Box<dyn DataSource>) {
        self.data_sources.insert(data_source.type_name(), data_source);
    }

    /// Look up a resource type.
    pub fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    /// Look up a data source type.
    pub fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| {
                ProviderError::UnknownResource(format!("data source {}", type_name))
            })
    }

    /// Resource types in name order.
    pub fn resources(&self) -> impl Iterator<Item = &dyn Resource> {
        self.resources.values().map(|r| r.as_ref())
    }

    /// Data source types in name order.
    pub fn data_sources(&self) -> impl Iterator<Item = &dyn DataSource> {
        self.data_sources.values().map(|d| d.as_ref())
    }
}

/// Split an import id of the form `a:b`.
pub(crate) fn parse_import_id2(id: &str) -> Result<(&str, &str), ProviderError> {
    match id.splitn(2, ':').collect::<Vec<_>>().as_slice() {
        [a, b] if !a.is_empty() && !b.is_empty() => Ok((*a, *b)),
        _ => Err(ProviderError::InvalidRequest(format!(
            "unexpected format of import resource id ({}), expected teamID:ID",
            id
        ))),
    }
}

/// Split an import id of the form `a:b:c`. The last part may contain `:`.
pub(crate) fn parse_import_id3(id: &str) -> Result<(&str, &str, &str), ProviderError> {
    match id.splitn(3, ':').collect::<Vec<_>>().as_slice() {
        [a, b, c] if !a.is_empty() && !b.is_empty() && !c.is_empty() => Ok((*a, *b, *c)),
        _ => Err(ProviderError::InvalidRequest(format!(
            "unexpected format of import resource id ({}), \
             expected teamID:scheduleName:rotationName",
            id
        ))),
    }
}

/// Treat a not-found error as an absent object.
pub(crate) fn absent_if_not_found<T>(
    result: Result<T, ProviderError>,
) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Empty strings become `None`.
pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
