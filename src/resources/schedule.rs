//! Legacy (REST) schedules: the `squadcast_schedule` resource and the data
//! source of the same name that looks one up by name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{absent_if_not_found, non_empty, parse_import_id2, DataSource, Resource};
use crate::api::{self, Client, ScheduleRequest};
use crate::codec::{decode, encode};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema, Validator};

const DEFAULT_COLOR: &str = "#0f61dd";

/// The `squadcast_schedule` resource.
pub struct Schedule;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ScheduleState {
    id: Option<String>,
    name: String,
    description: Option<String>,
    color: Option<String>,
    team_id: String,
}

#[derive(Debug, Deserialize)]
struct ScheduleKey {
    id: Option<String>,
    team_id: Option<String>,
}

impl ScheduleState {
    fn from_api(schedule: api::Schedule, team_id: &str) -> Self {
        Self {
            id: Some(schedule.id),
            name: schedule.name,
            description: non_empty(schedule.description),
            color: non_empty(schedule.colour),
            team_id: non_empty(schedule.owner.id).unwrap_or_else(|| team_id.to_string()),
        }
    }

    fn to_request(&self) -> ScheduleRequest {
        ScheduleRequest {
            name: self.name.clone(),
            colour: self.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            description: self.description.clone().unwrap_or_default(),
            team_id: self.team_id.clone(),
        }
    }
}

impl Schedule {
    fn to_state(&self, schedule: api::Schedule, team_id: &str) -> Result<Value, ProviderError> {
        encode(&self.schema().block, &ScheduleState::from_api(schedule, team_id))
    }

    fn key(&self, state: &Value) -> Result<Option<(String, String)>, ProviderError> {
        let key: ScheduleKey = decode(&self.schema().block, state)?;
        let Some(id) = key.id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        let team_id = key
            .team_id
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Validation("invalid team id provided".to_string()))?;
        Ok(Some((team_id, id)))
    }
}

#[async_trait]
impl Resource for Schedule {
    fn type_name(&self) -> &'static str {
        "squadcast_schedule"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Legacy schedules, managed through the REST API.")
            .with_attribute("id", Attribute::computed_string().with_description("Schedule id."))
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Name of the schedule."),
            )
            .with_attribute(
                "description",
                Attribute::optional_string().with_description("Description of the schedule."),
            )
            .with_attribute(
                "color",
                Attribute::optional_string()
                    .with_default(json!(DEFAULT_COLOR))
                    .with_description("Color of the schedule."),
            )
            .with_attribute(
                "team_id",
                Attribute::required_string()
                    .with_validator(Validator::ObjectId)
                    .with_force_new()
                    .with_description("Team id."),
            )
    }

    async fn create(&self, client: &Client, planned: &Value) -> Result<Value, ProviderError> {
        let state: ScheduleState = decode(&self.schema().block, planned)?;
        let created = client.create_schedule(&state.to_request()).await?;
        info!(id = %created.id, team_id = %state.team_id, "Legacy schedule created");
        self.to_state(created, &state.team_id)
    }

    async fn read(&self, client: &Client, current: &Value) -> Result<Option<Value>, ProviderError> {
        let Some((team_id, id)) = self.key(current)? else {
            return Ok(None);
        };
        match absent_if_not_found(client.get_schedule(&team_id, &id).await)? {
            Some(schedule) => self.to_state(schedule, &team_id).map(Some),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let (_, id) = self
            .key(prior)?
            .ok_or_else(|| ProviderError::FailedPrecondition("schedule has no id".to_string()))?;
        let state: ScheduleState = decode(&self.schema().block, planned)?;
        let updated = client.update_schedule(&id, &state.to_request()).await?;
        self.to_state(updated, &state.team_id)
    }

    async fn delete(&self, client: &Client, current: &Value) -> Result<(), ProviderError> {
        let Some((_, id)) = self.key(current)? else {
            return Ok(());
        };
        match client.delete_schedule(&id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Value, ProviderError> {
        let (team_id, schedule_id) = parse_import_id2(id)?;
        let schedule = client.get_schedule(team_id, schedule_id).await?;
        self.to_state(schedule, team_id)
    }
}

/// The `squadcast_schedule` data source.
pub struct ScheduleDataSource;

#[derive(Debug, Deserialize)]
struct Lookup {
    name: String,
    team_id: String,
}

#[derive(Debug, Serialize)]
struct ScheduleData {
    id: String,
    name: String,
    description: Option<String>,
    color: Option<String>,
    team_id: String,
}

#[async_trait]
impl DataSource for ScheduleDataSource {
    fn type_name(&self) -> &'static str {
        "squadcast_schedule"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Look up a schedule by name within a team.")
            .with_attribute("id", Attribute::computed_string().with_description("Schedule id."))
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Name of the schedule."),
            )
            .with_attribute(
                "team_id",
                Attribute::required_string()
                    .with_validator(Validator::ObjectId)
                    .with_description("Team id."),
            )
            .with_attribute(
                "description",
                Attribute::computed_string().with_description("Description of the schedule."),
            )
            .with_attribute(
                "color",
                Attribute::computed_string().with_description("Color of the schedule."),
            )
    }

    async fn read(&self, client: &Client, config: &Value) -> Result<Value, ProviderError> {
        let block = self.schema().block;
        let lookup: Lookup = decode(&block, config)?;
        debug!(name = %lookup.name, team_id = %lookup.team_id, "Looking up schedule");

        let schedule = client.get_schedule_by_name(&lookup.team_id, &lookup.name).await?;
        let team_id = non_empty(schedule.owner.id).unwrap_or(lookup.team_id);
        encode(
            &block,
            &ScheduleData {
                id: schedule.id,
                name: schedule.name,
                description: non_empty(schedule.description),
                color: non_empty(schedule.colour),
                team_id,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::client_for;
    use crate::plan::plan;
    use crate::testing::{assert_plan_no_changes, assert_plan_replaces};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEAM: &str = "611262fcd5b4ea846b534a8a";

    fn stored(name: &str) -> Value {
        json!({
            "data": {
                "id": "5f0c",
                "name": name,
                "slug": "primary",
                "colour": "#0f61dd",
                "description": null,
                "owner": {"id": TEAM, "type": "team"}
            }
        })
    }

    #[tokio::test]
    async fn test_create_schedule_applies_default_color() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/schedules"))
            .and(body_partial_json(json!({
                "name": "Primary",
                "colour": "#0f61dd",
                "owner_id": TEAM
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(stored("Primary")))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({"name": "Primary", "team_id": TEAM});
        let schema = Schedule.schema();
        let planned = plan(&schema, None, &config).unwrap().planned_state;
        let state = Schedule.create(&client_for(&server), &planned).await.unwrap();

        assert_eq!(state["id"], "5f0c");
        assert_eq!(state["color"], "#0f61dd");
        assert_eq!(state["description"], Value::Null);
        assert_plan_no_changes(&plan(&schema, Some(&state), &config).unwrap());

        let moved = json!({"name": "Primary", "team_id": "711262fcd5b4ea846b534a8b"});
        assert_plan_replaces(&plan(&schema, Some(&state), &moved).unwrap());
    }

    #[tokio::test]
    async fn test_read_update_and_delete_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules/5f0c"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored("Primary")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "meta": {"status": 404, "error_message": "schedule not found"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v3/schedules/5f0c"))
            .and(body_partial_json(json!({"name": "Night", "description": "Nights"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored("Night")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v3/schedules/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let state = Schedule
            .read(&client, &json!({"id": "5f0c", "team_id": TEAM}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["name"], "Primary");

        let gone = Schedule
            .read(&client, &json!({"id": "gone", "team_id": TEAM}))
            .await
            .unwrap();
        assert_eq!(gone, None);

        let err = Schedule.read(&client, &json!({"id": "5f0c"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));

        let planned = json!({
            "name": "Night",
            "description": "Nights",
            "color": "#0f61dd",
            "team_id": TEAM
        });
        let updated = Schedule.update(&client, &state, &planned).await.unwrap();
        assert_eq!(updated["name"], "Night");

        tokio_test::assert_ok!(
            Schedule
                .delete(&client, &json!({"id": "gone", "team_id": TEAM}))
                .await
        );
    }

    #[tokio::test]
    async fn test_import_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules/5f0c"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored("Primary")))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let state = Schedule.import(&client, &format!("{}:5f0c", TEAM)).await.unwrap();
        assert_eq!(state["id"], "5f0c");
        assert_eq!(state["team_id"], TEAM);

        let err = Schedule.import(&client, "5f0c").await.unwrap_err();
        assert!(err.to_string().contains("teamID:ID"));
    }

    #[tokio::test]
    async fn test_read_schedule_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "5f0c",
                    "name": "Primary",
                    "colour": "#0f61dd",
                    "description": "Day shift",
                    "owner": {"id": TEAM, "type": "team"}
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let data = ScheduleDataSource
            .read(&client, &json!({"name": "Primary", "team_id": TEAM}))
            .await
            .unwrap();
        assert_eq!(
            data,
            json!({
                "id": "5f0c",
                "name": "Primary",
                "description": "Day shift",
                "color": "#0f61dd",
                "team_id": TEAM
            })
        );

        let err = ScheduleDataSource
            .read(&client, &json!({"name": "Night", "team_id": TEAM}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
