//! `squadcast_webform`: public forms that raise incidents on selected services.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{absent_if_not_found, non_empty, parse_import_id2, Resource};
use crate::api::{self, Client, WebformRequest, WebformServiceRef, WebformSeverity};
use crate::codec::{decode, encode};
use crate::error::ProviderError;
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema, Validator,
};

/// The `squadcast_webform` resource.
pub struct Webform;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct WebformState {
    id: Option<String>,
    name: String,
    team_id: String,
    owner_type: Option<String>,
    host_name: Option<String>,
    is_cname: Option<bool>,
    public_url: Option<String>,
    is_all_services: Option<bool>,
    form_owner_type: String,
    form_owner_id: String,
    form_owner_name: String,
    header: String,
    title: String,
    description: Option<String>,
    footer_text: String,
    footer_link: String,
    email_on: Vec<String>,
    incident_count: Option<i64>,
    mttr: Option<i64>,
    tags: BTreeMap<String, String>,
    services: Vec<ServiceState>,
    severity: Vec<SeverityState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ServiceState {
    service_id: String,
    webform_id: Option<i64>,
    name: String,
    alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SeverityState {
    #[serde(rename = "type")]
    severity_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct WebformKey {
    id: Option<String>,
    team_id: Option<String>,
}

impl WebformKey {
    fn team_id(&self) -> Result<&str, ProviderError> {
        self.team_id
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Validation("invalid team id provided".to_string()))
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

impl WebformState {
    fn from_api(webform: api::Webform, team_id: &str) -> Self {
        Self {
            id: Some(webform.id.to_string()),
            name: webform.name,
            team_id: non_empty(webform.team_id).unwrap_or_else(|| team_id.to_string()),
            owner_type: non_empty(webform.owner_type),
            host_name: non_empty(webform.host_name),
            is_cname: Some(webform.is_cname),
            public_url: non_empty(webform.public_url),
            is_all_services: Some(webform.is_all_services),
            form_owner_type: webform.form_owner_type,
            form_owner_id: webform.form_owner_id,
            form_owner_name: webform.form_owner_name,
            header: webform.header,
            title: webform.title,
            description: non_empty(webform.description),
            footer_text: webform.footer_text,
            footer_link: webform.footer_link,
            email_on: webform.email_on,
            incident_count: Some(webform.incident_count),
            mttr: Some(webform.mttr),
            tags: webform.tags,
            services: webform
                .services
                .into_iter()
                .map(|s| ServiceState {
                    service_id: s.service_id,
                    webform_id: Some(s.webform_id as i64),
                    name: s.name,
                    alias: non_empty(s.alias),
                })
                .collect(),
            severity: webform
                .severity
                .into_iter()
                .map(|s| SeverityState {
                    severity_type: s.severity_type,
                    description: s.description,
                })
                .collect(),
        }
    }

    fn to_request(&self) -> WebformRequest {
        WebformRequest {
            name: self.name.clone(),
            team_id: self.team_id.clone(),
            form_owner_type: self.form_owner_type.clone(),
            form_owner_id: self.form_owner_id.clone(),
            form_owner_name: self.form_owner_name.clone(),
            host_name: self.host_name.clone().unwrap_or_default(),
            is_cname: self.is_cname.unwrap_or(false),
            header: self.header.clone(),
            title: self.title.clone(),
            description: self.description.clone().unwrap_or_default(),
            footer_text: self.footer_text.clone(),
            footer_link: self.footer_link.clone(),
            email_on: self.email_on.clone(),
            services: self
                .services
                .iter()
                .map(|s| WebformServiceRef {
                    service_id: s.service_id.clone(),
                    name: s.name.clone(),
                    alias: s.alias.clone().unwrap_or_default(),
                })
                .collect(),
            severity: self
                .severity
                .iter()
                .map(|s| WebformSeverity {
                    severity_type: s.severity_type.clone(),
                    description: s.description.clone(),
                })
                .collect(),
            tags: self.tags.clone(),
        }
    }
}

impl Webform {
    async fn fetch(
        &self,
        client: &Client,
        team_id: &str,
        id: &str,
    ) -> Result<Value, ProviderError> {
        let webform = client.get_webform(team_id, id).await?;
        encode(&self.schema().block, &WebformState::from_api(webform, team_id))
    }
}

#[async_trait]
impl Resource for Webform {
    fn type_name(&self) -> &'static str {
        "squadcast_webform"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "Squadcast webforms let customers and internal stakeholders raise incidents \
                 from outside Squadcast.",
            )
            .with_attribute("id", Attribute::computed_string().with_description("Webform id."))
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Name of the webform."),
            )
            .with_attribute(
                "team_id",
                Attribute::required_string()
                    .with_validator(Validator::ObjectId)
                    .with_force_new()
                    .with_description("Team id."),
            )
            .with_attribute(
                "owner_type",
                Attribute::computed_string().with_description("Owner type."),
            )
            .with_attribute(
                "host_name",
                Attribute::optional_string().with_description("Custom hostname (URL)."),
            )
            .with_attribute(
                "is_cname",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Set to true to serve the webform on a custom domain name."),
            )
            .with_attribute(
                "public_url",
                Attribute::computed_string().with_description("Public URL of the webform."),
            )
            .with_attribute(
                "is_all_services",
                Attribute::computed_bool()
                    .with_description("Whether the webform is available for all services."),
            )
            .with_attribute(
                "form_owner_type",
                Attribute::required_string()
                    .one_of(&["user", "team", "squad"])
                    .with_description("Form owner type (user, team, squad)."),
            )
            .with_attribute(
                "form_owner_id",
                Attribute::required_string().with_description("Form owner id."),
            )
            .with_attribute(
                "form_owner_name",
                Attribute::required_string().with_description("Form owner name."),
            )
            .with_attribute(
                "header",
                Attribute::required_string().with_description("Webform header."),
            )
            .with_attribute(
                "title",
                Attribute::required_string().with_description("Webform title (public)."),
            )
            .with_attribute(
                "description",
                Attribute::optional_string().with_description("Description of the webform."),
            )
            .with_attribute(
                "footer_text",
                Attribute::required_string().with_description("Footer text."),
            )
            .with_attribute(
                "footer_link",
                Attribute::required_string().with_description("Footer link."),
            )
            .with_attribute(
                "email_on",
                Attribute::new(
                    AttributeType::list(AttributeType::String),
                    AttributeFlags::optional(),
                )
                .one_of(&["triggered", "acknowledged", "resolved"])
                    .with_description(
                        "When to email the reporter (triggered, acknowledged, resolved).",
                    ),
            )
            .with_attribute(
                "incident_count",
                Attribute::computed_int64()
                    .with_description("Number of incidents created from this webform."),
            )
            .with_attribute(
                "mttr",
                Attribute::computed_int64().with_description("Mean time to repair."),
            )
            .with_attribute(
                "tags",
                Attribute::new(
                    AttributeType::map(AttributeType::String),
                    AttributeFlags::optional(),
                )
                .with_description("Webform tags."),
            )
            .with_block(
                "services",
                NestedBlock::list(
                    Block::new()
                        .with_description("Services added to the webform.")
                        .with_attribute(
                            "service_id",
                            Attribute::required_string().with_description("Service id."),
                        )
                        .with_attribute(
                            "webform_id",
                            Attribute::computed_int64().with_description("Webform id."),
                        )
                        .with_attribute(
                            "name",
                            Attribute::required_string().with_description("Service name."),
                        )
                        .with_attribute(
                            "alias",
                            Attribute::optional_string().with_description("Service alias."),
                        ),
                )
                .with_min_items(1),
            )
            .with_block(
                "severity",
                NestedBlock::list(
                    Block::new()
                        .with_description("Severities offered to the reporter.")
                        .with_attribute(
                            "type",
                            Attribute::required_string().with_description("Severity type."),
                        )
                        .with_attribute(
                            "description",
                            Attribute::required_string()
                                .with_description("Severity description."),
                        ),
                )
                .with_min_items(1),
            )
    }

    async fn create(&self, client: &Client, planned: &Value) -> Result<Value, ProviderError> {
        let state: WebformState = decode(&self.schema().block, planned)?;
        let created = client
            .create_webform(&state.team_id, &state.to_request())
            .await?;
        let id = created.id.to_string();
        info!(id = %id, team_id = %state.team_id, "Webform created");
        self.fetch(client, &state.team_id, &id).await
    }

    async fn read(&self, client: &Client, current: &Value) -> Result<Option<Value>, ProviderError> {
        let key: WebformKey = decode(&self.schema().block, current)?;
        let Some(id) = key.id() else {
            return Ok(None);
        };
        let team_id = key.team_id()?;
        absent_if_not_found(self.fetch(client, team_id, id).await)
    }

    async fn update(
        &self,
        client: &Client,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let block = self.schema().block;
        let key: WebformKey = decode(&block, prior)?;
        let id = key
            .id()
            .ok_or_else(|| ProviderError::FailedPrecondition("webform has no id".to_string()))?;
        let state: WebformState = decode(&block, planned)?;

        client
            .update_webform(&state.team_id, id, &state.to_request())
            .await?;
        self.fetch(client, &state.team_id, id).await
    }

    async fn delete(&self, client: &Client, current: &Value) -> Result<(), ProviderError> {
        let key: WebformKey = decode(&self.schema().block, current)?;
        let Some(id) = key.id() else {
            return Ok(());
        };
        let team_id = key.team_id()?;
        match client.delete_webform(team_id, id).await {
            Err(e) if e.is_not_found() => {
                info!(id, "Webform already deleted");
                Ok(())
            },
            other => other,
        }
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Value, ProviderError> {
        let (team_id, webform_id) = parse_import_id2(id)?;
        self.fetch(client, team_id, webform_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::client_for;
    use crate::plan::plan;
    use crate::testing::assert_plan_no_changes;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEAM: &str = "611262fcd5b4ea846b534a8a";

    fn config() -> Value {
        json!({
            "name": "Customer issues",
            "team_id": TEAM,
            "form_owner_type": "team",
            "form_owner_id": TEAM,
            "form_owner_name": "Platform",
            "header": "Report an issue",
            "title": "Acme status",
            "footer_text": "Acme",
            "footer_link": "https://acme.example",
            "email_on": ["triggered", "resolved"],
            "tags": {"source": "web"},
            "services": [{"service_id": "svc1", "name": "API"}],
            "severity": [{"type": "critical", "description": "Everything is down"}]
        })
    }

    fn remote() -> Value {
        json!({
            "id": 42,
            "name": "Customer issues",
            "owner_id": TEAM,
            "owner_type": "team",
            "host_name": "",
            "is_cname": false,
            "public_url": "https://acme.squadcast.com/webform/42",
            "is_all_services": false,
            "form_owner_type": "team",
            "form_owner_id": TEAM,
            "form_owner_name": "Platform",
            "header": "Report an issue",
            "title": "Acme status",
            "description": "",
            "footer_text": "Acme",
            "footer_link": "https://acme.example",
            "email_on": ["triggered", "resolved"],
            "incident_count": 3,
            "mttr": 120,
            "tags": {"source": "web"},
            "services": [{"service_id": "svc1", "webform_id": 42, "name": "API", "alias": ""}],
            "severity": [{"type": "critical", "description": "Everything is down"}]
        })
    }

    async fn mount_get(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v3/webform/42"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": remote()})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_then_plan_shows_no_drift() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/webform"))
            .and(query_param("owner_id", TEAM))
            .and(body_partial_json(json!({
                "owner_id": TEAM,
                "is_cname": false,
                "services": [{"service_id": "svc1", "name": "API"}]
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"data": {"webform": remote()}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server).await;

        let client = client_for(&server);
        let state = Webform.create(&client, &config()).await.unwrap();

        assert_eq!(state["id"], "42");
        assert_eq!(state["public_url"], "https://acme.squadcast.com/webform/42");
        assert_eq!(state["services"][0]["webform_id"], 42);
        assert_eq!(state["description"], Value::Null);

        let result = plan(&Webform.schema(), Some(&state), &config()).unwrap();
        assert_plan_no_changes(&result);
    }

    #[tokio::test]
    async fn test_read_missing_webform_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/webform/42"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "meta": {"status": 404, "error_message": "webform not found"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let state = json!({"id": "42", "team_id": TEAM});
        assert_eq!(Webform.read(&client, &state).await.unwrap(), None);
        assert_eq!(Webform.read(&client, &json!({"team_id": TEAM})).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_requires_team_id() {
        let server = MockServer::start().await;
        let err = Webform
            .read(&client_for(&server), &json!({"id": "42"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid team id"));
    }

    #[tokio::test]
    async fn test_update_puts_and_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v3/webform/42"))
            .and(query_param("owner_id", TEAM))
            .and(body_partial_json(json!({"title": "Acme status page"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server).await;

        let client = client_for(&server);
        let mut planned = config();
        planned["title"] = json!("Acme status page");
        let prior = json!({"id": "42", "team_id": TEAM});

        let state = Webform.update(&client, &prior, &planned).await.unwrap();
        assert_eq!(state["id"], "42");
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_webform() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/webform/42"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        tokio_test::assert_ok!(
            Webform
                .delete(&client, &json!({"id": "42", "team_id": TEAM}))
                .await
        );
    }

    #[tokio::test]
    async fn test_import_by_team_and_id() {
        let server = MockServer::start().await;
        mount_get(&server).await;
        let client = client_for(&server);

        let state = Webform.import(&client, &format!("{}:42", TEAM)).await.unwrap();
        assert_eq!(state["team_id"], TEAM);
        assert_eq!(state["tags"], json!({"source": "web"}));

        let err = Webform.import(&client, "42").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
