//! The Squadcast provider: wires the registry and API client into the
//! protocol-level [`ProviderService`].

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::Client;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan::plan;
use crate::resources::Registry;
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

/// Squadcast provider.
///
/// Holds no API client until [`ProviderService::configure`] succeeds. Every
/// operation that talks to Squadcast fails with `FailedPrecondition` before
/// that.
pub struct SquadcastProvider {
    registry: Registry,
    client: RwLock<Option<Arc<Client>>>,
}

impl Default for SquadcastProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SquadcastProvider {
    /// Provider offering every built-in resource and data source.
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Provider offering the types of `registry`.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            client: RwLock::new(None),
        }
    }

    /// Whether a client has been configured.
    pub async fn is_configured(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn client(&self) -> Result<Arc<Client>, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::FailedPrecondition(
                "provider is not configured, call configure first".to_string(),
            )
        })
    }
}

#[async_trait::async_trait]
impl ProviderService for SquadcastProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = self
            .registry
            .resources()
            .fold(ProviderSchema::new(), |schema, resource| {
                schema.with_resource(resource.type_name(), resource.schema())
            });
        self.registry
            .data_sources()
            .fold(schema, |schema, data_source| {
                schema.with_data_source(data_source.type_name(), data_source.schema())
            })
            .with_provider_config(ProviderConfig::schema())
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&ProviderConfig::schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let settings = match ProviderConfig::from_value(&config) {
            Ok(settings) => settings,
            Err(e) => return Ok(vec![Diagnostic::error(e.to_string())]),
        };
        debug!(config = ?settings, "Configuring provider");

        let client = Client::connect(&settings).await?;
        *self.client.write().await = Some(Arc::new(client));
        info!(region = %settings.region, "Provider configured");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.client.write().await.take();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let mut diagnostics = validate(&resource.schema(), &config);
        if !has_errors(&diagnostics) {
            diagnostics.extend(resource.validate(&config));
        }
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let prior = prior_state.filter(|state| !state.is_null());
        plan(&resource.schema(), prior.as_ref(), &proposed_state)
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let client = self.client().await?;
        resource.create(&client, &planned_state).await
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let client = self.client().await?;
        match resource.read(&client, &current_state).await? {
            Some(state) => Ok(state),
            None => {
                info!(resource_type, "Resource no longer exists");
                Ok(Value::Null)
            },
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let client = self.client().await?;
        resource.update(&client, &prior_state, &planned_state).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let client = self.client().await?;
        resource.delete(&client, &current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let client = self.client().await?;
        let state = resource.import(&client, id).await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let data_source = self.registry.data_source(data_source_type)?;
        Ok(validate(&data_source.schema(), &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let data_source = self.registry.data_source(data_source_type)?;
        let client = self.client().await?;
        data_source.read(&client, &config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn token_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access-token"))
            .and(header("X-Refresh-Token", "refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"access_token": "access", "token_type": "Bearer"}
            })))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_schema_lists_every_type() {
        let schema = SquadcastProvider::new().schema();
        assert!(schema.resources.contains_key("squadcast_webform"));
        assert!(schema.resources.contains_key("squadcast_schedule"));
        assert!(schema.resources.contains_key("squadcast_schedule_v2"));
        assert!(schema.resources.contains_key("squadcast_schedule_rotation_v2"));
        assert!(schema.data_sources.contains_key("squadcast_schedule"));
        assert!(schema.provider.block.attributes.contains_key("refresh_token"));
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let provider = SquadcastProvider::new();
        let err = provider
            .read("squadcast_webform", json!({"id": "1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));

        let err = provider
            .create("squadcast_unknown", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_configure_and_stop() {
        let server = token_server().await;
        let provider = SquadcastProvider::new();

        let diagnostics = provider
            .configure(json!({"refresh_token": "refresh", "endpoint": server.uri()}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
        assert!(provider.is_configured().await);

        tokio_test::assert_ok!(provider.stop().await);
        assert!(!provider.is_configured().await);
    }

    #[tokio::test]
    async fn test_configure_reports_invalid_settings() {
        let provider = SquadcastProvider::new();
        let diagnostics = provider
            .configure(json!({"refresh_token": "refresh", "region": "mars"}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("region"));
        assert!(!provider.is_configured().await);
    }

    #[tokio::test]
    async fn test_configure_fails_on_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access-token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "meta": {"status": 401, "error_message": "invalid refresh token"}
            })))
            .mount(&server)
            .await;

        let provider = SquadcastProvider::new();
        let err = provider
            .configure(json!({"refresh_token": "refresh", "endpoint": server.uri()}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config_runs_resource_rules() {
        let provider = SquadcastProvider::new();
        let config = json!({
            "schedule_id": 1,
            "name": "Primary",
            "start_date": "2024-01-01T00:00:00Z",
            "period": "daily",
            "custom_period_unit": "week",
            "change_participants_frequency": 1,
            "change_participants_unit": "rotation",
            "shift_timeslots": [{"start_hour": 9, "start_minute": 0, "duration": 60}]
        });

        let diagnostics = provider
            .validate_resource_config("squadcast_schedule_rotation_v2", config)
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("custom_period_unit"));

        let diagnostics = provider
            .validate_resource_config("squadcast_schedule_v2", json!({"name": "x"}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));
    }

    #[tokio::test]
    async fn test_plan_treats_null_prior_as_create() {
        let provider = SquadcastProvider::new();
        let result = provider
            .plan(
                "squadcast_schedule_v2",
                Some(Value::Null),
                json!({
                    "name": "Primary",
                    "timezone": "UTC",
                    "team_id": "611262fcd5b4ea846b534a8a"
                }),
                Value::Null,
            )
            .await
            .unwrap();
        assert!(result.has_changes());
        assert_eq!(result.planned_state["id"], Value::Null);
        assert!(!result.requires_replace);
    }
}
