//! Test harness for driving a [`ProviderService`] without a gRPC server.
//!
//! ```ignore
//! let tester = ProviderTester::new(SquadcastProvider::new());
//! tester
//!     .configure(json!({"refresh_token": "t", "endpoint": mock.uri()}))
//!     .await?;
//! let state = tester.lifecycle_create("squadcast_schedule_v2", config).await?;
//! ```
#![allow(missing_docs)]

use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Wraps a provider and exposes each protocol operation as a plain method.
///
/// Validation-style operations turn error diagnostics into
/// [`TestError::Diagnostics`] so tests can use `?` on them.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The full provider schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.provider.validate_provider_config(config).await?)
    }

    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.provider.configure(config).await?)
    }

    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

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

    /// Plan a create from `config`.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan moving `prior_state` to `config`.
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

    /// Plan destroying `prior_state`.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Refresh state. `Value::Null` means the resource is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
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

    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Import and return the state of the single imported resource.
    pub async fn import_state(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Value, ProviderError> {
        let mut imported = self.import_resource(resource_type, id).await?;
        match (imported.pop(), imported.is_empty()) {
            (Some(resource), true) => Ok(resource.state),
            (None, _) => Err(ProviderError::NotFound(format!("nothing imported for {}", id))),
            (Some(_), false) => Err(ProviderError::Sdk(format!(
                "expected one imported resource for {}, got {}",
                id,
                imported.len() + 1
            ))),
        }
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

    /// Validate, plan, create and read back. Returns the refreshed state.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.refresh(resource_type, created).await
    }

    /// Validate, plan, update and read back. Returns the refreshed state.
    ///
    /// Fails when the plan would replace the resource.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        if plan.requires_replace {
            return Err(TestError::Provider(ProviderError::FailedPrecondition(format!(
                "{} change requires replacement",
                resource_type
            ))));
        }
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.refresh(resource_type, updated).await
    }

    /// Plan the destroy and delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), TestError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        Ok(self.delete(resource_type, current_state).await?)
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone())
            .await?;
        Ok(updated)
    }

    async fn refresh(&self, resource_type: &str, state: Value) -> Result<Value, TestError> {
        match self.read(resource_type, state).await? {
            Value::Null => Err(TestError::Provider(ProviderError::NotFound(format!(
                "{} vanished right after it was written",
                resource_type
            )))),
            state => Ok(state),
        }
    }
}

/// Failure of a [`ProviderTester`] operation.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The operation returned error diagnostics.
    #[error("operation failed with diagnostics: {}", summarize(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The operation returned a provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.attribute {
            Some(attribute) => format!("{} (at {})", d.summary, attribute),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert the plan creates: it has changes and no replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "expected plan to have changes for create, got none"
    );
    assert!(!plan.requires_replace, "expected plan to create, not replace");
}

/// Assert the plan has no changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "expected no changes, got {:?}",
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

pub fn assert_plan_has_changes(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "expected plan to have changes, got none");
}

pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(plan.requires_replace, "expected plan to require replacement");
}

pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "expected plan to update in place, but it requires replacement"
    );
}

/// Assert the plan changes the top-level attribute or block `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "expected plan to change '{}', changed: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "expected plan to leave '{}' unchanged",
        path
    );
}

pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "expected no errors, got {:?}",
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "expected at least one error, got none"
    );
}

/// Assert some error diagnostic's summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "expected an error containing '{}', errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SquadcastProvider;
    use serde_json::json;

    const TEAM: &str = "611262fcd5b4ea846b534a8a";

    fn tester() -> ProviderTester<SquadcastProvider> {
        ProviderTester::new(SquadcastProvider::new())
    }

    fn schedule() -> Value {
        json!({"name": "Primary", "timezone": "UTC", "team_id": TEAM})
    }

    #[test]
    fn test_types() {
        let tester = tester();
        assert_eq!(tester.data_source_types(), vec!["squadcast_schedule"]);
        assert!(tester.resource_types().contains(&"squadcast_webform".to_string()));
        assert!(tester.schema().provider.block.attributes.contains_key("region"));
    }

    #[tokio::test]
    async fn test_validate_provider_config() {
        let tester = tester();
        tokio_test::assert_ok!(tester.validate_provider_config(json!({"region": "eu"})).await);

        let err = tester
            .validate_provider_config(json!({"timeout_seconds": 0}))
            .await
            .unwrap_err();
        assert!(matches!(&err, TestError::Diagnostics(d) if d.len() == 1));
        assert!(err.to_string().contains("timeout_seconds"));
    }

    #[tokio::test]
    async fn test_plans() {
        let tester = tester();
        let create = tester.plan_create("squadcast_schedule_v2", schedule()).await.unwrap();
        assert_plan_creates(&create);
        assert_plan_changes_attribute(&create, "timezone");

        let mut prior = schedule();
        prior["id"] = json!("7");
        let same = tester
            .plan_update("squadcast_schedule_v2", prior.clone(), schedule())
            .await
            .unwrap();
        assert_plan_no_changes(&same);
        assert_eq!(same.planned_state["id"], "7");

        let mut moved = schedule();
        moved["team_id"] = json!("711262fcd5b4ea846b534a8b");
        let replace = tester
            .plan_update("squadcast_schedule_v2", prior.clone(), moved)
            .await
            .unwrap();
        assert_plan_has_changes(&replace);
        assert_plan_replaces(&replace);

        let destroy = tester.plan_delete("squadcast_schedule_v2", prior).await.unwrap();
        assert_eq!(destroy.planned_state, Value::Null);
        assert_plan_changes_attribute(&destroy, "id");
    }

    #[tokio::test]
    async fn test_upgrade_passes_state_through() {
        let state = tester()
            .upgrade_resource_state("squadcast_schedule_v2", 0, schedule())
            .await
            .unwrap();
        assert_eq!(state, schedule());
    }

    #[tokio::test]
    async fn test_lifecycle_stops_on_invalid_config() {
        let err = tester()
            .lifecycle_create("squadcast_schedule_v2", json!({"name": "Primary"}))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => {
                assert_has_errors(&diagnostics);
                assert_error_contains(&diagnostics, "Missing required attribute");
            },
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_diagnostic_assertions() {
        let diagnostics = vec![
            Diagnostic::warning("deprecated"),
            Diagnostic::error("invalid region").with_attribute("region"),
        ];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "region");
        assert_no_errors(&diagnostics[..1]);

        let err = TestError::Diagnostics(diagnostics[1..].to_vec());
        assert_eq!(
            err.to_string(),
            "operation failed with diagnostics: invalid region (at region)"
        );
    }

    #[test]
    #[should_panic(expected = "expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("boom")]);
    }
}
