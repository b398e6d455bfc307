//! `squadcast_schedule_v2`: on-call schedules backed by the GraphQL API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{absent_if_not_found, non_empty, Resource};
use crate::api::{self, parse_numeric_id, Client, ScheduleInput, ScheduleTag};
use crate::codec::{decode, encode};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema, Validator};

/// The `squadcast_schedule_v2` resource.
pub struct ScheduleV2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ScheduleState {
    id: Option<String>,
    name: String,
    description: Option<String>,
    timezone: String,
    team_id: String,
    tags: Vec<TagState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TagState {
    key: String,
    value: String,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleKey {
    id: Option<String>,
}

impl From<api::ScheduleV2> for ScheduleState {
    fn from(schedule: api::ScheduleV2) -> Self {
        Self {
            id: Some(schedule.id.to_string()),
            team_id: schedule.owning_team().to_string(),
            name: schedule.name,
            description: non_empty(schedule.description),
            timezone: schedule.time_zone,
            tags: schedule
                .tags
                .into_iter()
                .map(|t| TagState {
                    key: t.key,
                    value: t.value,
                    color: non_empty(t.color),
                })
                .collect(),
        }
    }
}

impl ScheduleState {
    fn to_input(&self) -> ScheduleInput {
        ScheduleInput {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            time_zone: self.timezone.clone(),
            team_id: self.team_id.clone(),
            tags: self
                .tags
                .iter()
                .map(|t| ScheduleTag {
                    key: t.key.clone(),
                    value: t.value.clone(),
                    color: t.color.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

impl ScheduleV2 {
    fn to_state(&self, schedule: api::ScheduleV2) -> Result<Value, ProviderError> {
        encode(&self.schema().block, &ScheduleState::from(schedule))
    }

    fn schedule_id(&self, state: &Value) -> Result<Option<i64>, ProviderError> {
        let key: ScheduleKey = decode(&self.schema().block, state)?;
        key.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| parse_numeric_id("schedule", id))
            .transpose()
    }
}

#[async_trait]
impl Resource for ScheduleV2 {
    fn type_name(&self) -> &'static str {
        "squadcast_schedule_v2"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "Schedules decide who is on call. Rotations inside a schedule define the shifts.",
            )
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
                "timezone",
                Attribute::required_string()
                    .with_description("Time zone of the schedule, e.g. `Asia/Kolkata`."),
            )
            .with_attribute(
                "team_id",
                Attribute::required_string()
                    .with_validator(Validator::ObjectId)
                    .with_force_new()
                    .with_description("Team id."),
            )
            .with_block(
                "tags",
                NestedBlock::list(
                    Block::new()
                        .with_description("Schedule tags.")
                        .with_attribute("key", Attribute::required_string())
                        .with_attribute("value", Attribute::required_string())
                        .with_attribute("color", Attribute::optional_string()),
                ),
            )
    }

    async fn create(&self, client: &Client, planned: &Value) -> Result<Value, ProviderError> {
        let state: ScheduleState = decode(&self.schema().block, planned)?;
        let created = client.create_schedule_v2(&state.to_input()).await?;
        info!(id = created.id, team_id = %state.team_id, "Schedule created");

        let mut fresh = ScheduleState::from(created);
        if fresh.team_id.is_empty() {
            fresh.team_id = state.team_id;
        }
        encode(&self.schema().block, &fresh)
    }

    async fn read(&self, client: &Client, current: &Value) -> Result<Option<Value>, ProviderError> {
        let Some(id) = self.schedule_id(current)? else {
            return Ok(None);
        };
        match absent_if_not_found(client.get_schedule_v2(id).await)? {
            Some(schedule) => self.to_state(schedule).map(Some),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = self
            .schedule_id(prior)?
            .ok_or_else(|| ProviderError::FailedPrecondition("schedule has no id".to_string()))?;
        let state: ScheduleState = decode(&self.schema().block, planned)?;

        client.update_schedule_v2(id, &state.to_input()).await?;
        let schedule = client.get_schedule_v2(id).await?;
        self.to_state(schedule)
    }

    async fn delete(&self, client: &Client, current: &Value) -> Result<(), ProviderError> {
        let Some(id) = self.schedule_id(current)? else {
            return Ok(());
        };
        match client.delete_schedule_v2(id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Value, ProviderError> {
        let id = parse_numeric_id("schedule", id)?;
        let schedule = client.get_schedule_v2(id).await?;
        self.to_state(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::client_for;
    use crate::plan::plan;
    use crate::testing::assert_plan_no_changes;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEAM: &str = "611262fcd5b4ea846b534a8a";

    fn schedule_json() -> Value {
        json!({
            "ID": 7,
            "name": "Primary",
            "description": "",
            "timeZone": "Asia/Kolkata",
            "teamID": "",
            "tags": [{"key": "env", "value": "prod", "color": "#ff0000"}],
            "owner": {"ID": TEAM, "type": "team"}
        })
    }

    #[tokio::test]
    async fn test_create_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_partial_json(json!({
                "variables": {
                    "input": {"name": "Primary", "timeZone": "Asia/Kolkata", "teamID": TEAM}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"createSchedule": schedule_json()}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({
            "name": "Primary",
            "timezone": "Asia/Kolkata",
            "team_id": TEAM,
            "tags": [{"key": "env", "value": "prod", "color": "#ff0000"}]
        });
        let state = ScheduleV2
            .create(&client_for(&server), &config)
            .await
            .unwrap();

        assert_eq!(state["id"], "7");
        assert_eq!(state["team_id"], TEAM);
        assert_eq!(state["description"], Value::Null);
        assert_plan_no_changes(&plan(&ScheduleV2.schema(), Some(&state), &config).unwrap());
    }

    #[tokio::test]
    async fn test_read_gone_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"schedule": null},
                "errors": [{"message": "schedule not found"}]
            })))
            .mount(&server)
            .await;

        let state = json!({"id": "7", "team_id": TEAM});
        assert_eq!(ScheduleV2.read(&client_for(&server), &state).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_rejected() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let err = ScheduleV2.read(&client, &json!({"id": "abc"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(ScheduleV2.import(&client, "abc").await.is_err());
    }

    #[tokio::test]
    async fn test_update_then_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_string_contains("updateSchedule"))
            .and(body_partial_json(json!({
                "variables": {"ID": 7, "input": {"description": "night"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"updateSchedule": schedule_json()}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_string_contains("schedule(ID: $ID)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"schedule": schedule_json()}
            })))
            .mount(&server)
            .await;

        let planned = json!({
            "name": "Primary",
            "description": "night",
            "timezone": "Asia/Kolkata",
            "team_id": TEAM
        });
        let state = ScheduleV2
            .update(&client_for(&server), &json!({"id": "7"}), &planned)
            .await
            .unwrap();
        assert_eq!(state["tags"][0]["key"], "env");
    }

    #[tokio::test]
    async fn test_import_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_string_contains("deleteSchedule"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"deleteSchedule": {"ID": 7}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_string_contains("schedule(ID: $ID)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"schedule": schedule_json()}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let state = ScheduleV2.import(&client, "7").await.unwrap();
        assert_eq!(state["timezone"], "Asia/Kolkata");
        assert_eq!(state["team_id"], TEAM);

        tokio_test::assert_ok!(ScheduleV2.delete(&client, &state).await);
    }
}
