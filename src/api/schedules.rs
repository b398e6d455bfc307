//! Schedule endpoints: the legacy REST listing and the v2 GraphQL schedules.
#![allow(missing_docs)]

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{nullable, Client, Operation};
use crate::error::ProviderError;

/// A legacy (v1) schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub slug: String,
    #[serde(deserialize_with = "nullable")]
    pub colour: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    pub owner: OwnerRef,
}

/// Owner reference used by the REST API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerRef {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub owner_type: String,
}

/// A v2 schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleV2 {
    #[serde(rename = "ID", deserialize_with = "nullable")]
    pub id: i64,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub time_zone: String,
    #[serde(rename = "teamID", deserialize_with = "nullable")]
    pub team_id: String,
    #[serde(deserialize_with = "nullable")]
    pub tags: Vec<ScheduleTag>,
    pub owner: Option<ScheduleOwner>,
}

impl ScheduleV2 {
    /// The owning team, taken from the owner reference when present.
    pub fn owning_team(&self) -> &str {
        match &self.owner {
            Some(owner) if !owner.id.is_empty() => &owner.id,
            _ => &self.team_id,
        }
    }
}

/// Owner reference used by the GraphQL API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOwner {
    #[serde(rename = "ID", deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub owner_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleTag {
    #[serde(deserialize_with = "nullable")]
    pub key: String,
    #[serde(deserialize_with = "nullable")]
    pub value: String,
    #[serde(deserialize_with = "nullable")]
    pub color: String,
}

/// Create and update input for v2 schedules.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInput {
    pub name: String,
    pub description: String,
    pub time_zone: String,
    #[serde(rename = "teamID")]
    pub team_id: String,
    pub tags: Vec<ScheduleTag>,
}

/// Create and update body for legacy schedules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub colour: String,
    pub description: String,
    #[serde(rename = "owner_id")]
    pub team_id: String,
}

pub(super) const SCHEDULE_SELECTION: &str =
    "ID name description timeZone teamID tags { key value color } owner { ID type }";

impl Client {
    pub async fn list_schedules(&self, team_id: &str) -> Result<Vec<Schedule>, ProviderError> {
        self.request::<(), _>(Method::GET, "/schedules", &[("owner_id", team_id)], None)
            .await
    }

    pub async fn get_schedule(&self, team_id: &str, id: &str) -> Result<Schedule, ProviderError> {
        self.request::<(), _>(
            Method::GET,
            &format!("/schedules/{}", id),
            &[("owner_id", team_id)],
            None,
        )
        .await
    }

    /// Find a legacy schedule by exact name within a team.
    pub async fn get_schedule_by_name(
        &self,
        team_id: &str,
        name: &str,
    ) -> Result<Schedule, ProviderError> {
        self.list_schedules(team_id)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                ProviderError::NotFound(format!("could not find a schedule with name `{}`", name))
            })
    }

    pub async fn create_schedule(
        &self,
        request: &ScheduleRequest,
    ) -> Result<Schedule, ProviderError> {
        info!(team_id = %request.team_id, name = %request.name, "Creating legacy schedule");
        self.request(Method::POST, "/schedules", &[], Some(request)).await
    }

    pub async fn update_schedule(
        &self,
        id: &str,
        request: &ScheduleRequest,
    ) -> Result<Schedule, ProviderError> {
        info!(id, name = %request.name, "Updating legacy schedule");
        self.request(Method::PUT, &format!("/schedules/{}", id), &[], Some(request))
            .await
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<(), ProviderError> {
        info!(id, "Deleting legacy schedule");
        self.request_unit::<()>(Method::DELETE, &format!("/schedules/{}", id), &[], None)
            .await
    }

    pub async fn get_schedule_v2(&self, id: i64) -> Result<ScheduleV2, ProviderError> {
        let op = Operation::query("schedule")
            .argument("ID", "Int!", json!(id))
            .select(SCHEDULE_SELECTION);
        self.graphql(&op).await
    }

    pub async fn list_schedules_v2(&self, team_id: &str) -> Result<Vec<ScheduleV2>, ProviderError> {
        let op = Operation::query("schedules")
            .argument("filters", "ScheduleFilters!", json!({ "teamID": team_id }))
            .select(SCHEDULE_SELECTION);
        self.graphql(&op).await
    }

    /// Find a v2 schedule by exact name within a team.
    pub async fn get_schedule_v2_by_name(
        &self,
        team_id: &str,
        name: &str,
    ) -> Result<ScheduleV2, ProviderError> {
        self.list_schedules_v2(team_id)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                ProviderError::NotFound(format!("could not find a schedule with name `{}`", name))
            })
    }

    pub async fn create_schedule_v2(
        &self,
        input: &ScheduleInput,
    ) -> Result<ScheduleV2, ProviderError> {
        info!(team_id = %input.team_id, name = %input.name, "Creating schedule");
        let op = Operation::mutation("createSchedule")
            .argument("input", "CreateScheduleInput!", serde_json::to_value(input)?)
            .select(SCHEDULE_SELECTION);
        self.graphql(&op).await
    }

    pub async fn update_schedule_v2(
        &self,
        id: i64,
        input: &ScheduleInput,
    ) -> Result<ScheduleV2, ProviderError> {
        info!(id, name = %input.name, "Updating schedule");
        let op = Operation::mutation("updateSchedule")
            .argument("ID", "Int!", json!(id))
            .argument("input", "UpdateScheduleInput!", serde_json::to_value(input)?)
            .select(SCHEDULE_SELECTION);
        self.graphql(&op).await
    }

    pub async fn delete_schedule_v2(&self, id: i64) -> Result<(), ProviderError> {
        info!(id, "Deleting schedule");
        let op = Operation::mutation("deleteSchedule")
            .argument("ID", "Int!", json!(id))
            .select("ID");
        let _: Value = self.graphql(&op).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::client_for;
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEAM: &str = "611262fcd5b4ea846b534a8a";

    #[tokio::test]
    async fn test_get_schedule_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {
                        "id": "a1",
                        "name": "Primary",
                        "colour": "#fff",
                        "owner": {"id": TEAM, "type": "team"}
                    },
                    {"id": "b2", "name": "Secondary"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let schedule = client.get_schedule_by_name(TEAM, "Secondary").await.unwrap();
        assert_eq!(schedule.id, "b2");

        let err = client.get_schedule_by_name(TEAM, "Missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("`Missing`"));
    }

    #[tokio::test]
    async fn test_legacy_schedule_crud() {
        let server = MockServer::start().await;
        let body = json!({
            "name": "Primary",
            "colour": "#0f61dd",
            "description": "",
            "owner_id": TEAM
        });
        let stored = json!({
            "data": {"id": "a1", "name": "Primary", "colour": "#0f61dd", "description": null,
                     "owner": {"id": TEAM, "type": "team"}}
        });
        Mock::given(method("POST"))
            .and(path("/v3/schedules"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(201).set_body_json(&stored))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules/a1"))
            .and(query_param("owner_id", TEAM))
            .respond_with(ResponseTemplate::new(200).set_body_json(&stored))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v3/schedules/a1"))
            .and(body_partial_json(json!({"name": "Renamed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "a1", "name": "Renamed", "owner": {"id": TEAM, "type": "team"}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v3/schedules/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut request = ScheduleRequest {
            name: "Primary".to_string(),
            colour: "#0f61dd".to_string(),
            description: String::new(),
            team_id: TEAM.to_string(),
        };
        let created = client.create_schedule(&request).await.unwrap();
        assert_eq!(created.id, "a1");
        assert_eq!(created.description, "");

        let fetched = client.get_schedule(TEAM, "a1").await.unwrap();
        assert_eq!(fetched.owner.id, TEAM);

        request.name = "Renamed".to_string();
        let updated = client.update_schedule("a1", &request).await.unwrap();
        assert_eq!(updated.name, "Renamed");

        tokio_test::assert_ok!(client.delete_schedule("a1").await);
    }

    #[tokio::test]
    async fn test_get_schedule_v2_sends_graphql_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_partial_json(json!({"variables": {"ID": 7}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"schedule": {
                    "ID": 7,
                    "name": "Primary",
                    "description": null,
                    "timeZone": "Asia/Kolkata",
                    "teamID": null,
                    "tags": [{"key": "tier", "value": "1", "color": null}],
                    "owner": {"ID": TEAM, "type": "team"}
                }}
            })))
            .mount(&server)
            .await;

        let schedule = client_for(&server).get_schedule_v2(7).await.unwrap();
        assert_eq!(schedule.id, 7);
        assert_eq!(schedule.time_zone, "Asia/Kolkata");
        assert_eq!(schedule.owning_team(), TEAM);
        assert_eq!(schedule.description, "");
        assert_eq!(schedule.tags[0].color, "");
    }

    #[tokio::test]
    async fn test_create_schedule_v2_input_is_camel_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .and(body_partial_json(json!({
                "variables": {"input": {"name": "Primary", "timeZone": "UTC", "teamID": TEAM}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "createSchedule": {
                        "ID": 9,
                        "name": "Primary",
                        "timeZone": "UTC",
                        "teamID": TEAM
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let input = ScheduleInput {
            name: "Primary".to_string(),
            description: String::new(),
            time_zone: "UTC".to_string(),
            team_id: TEAM.to_string(),
            tags: vec![],
        };
        let created = client_for(&server).create_schedule_v2(&input).await.unwrap();
        assert_eq!(created.id, 9);
        assert_eq!(created.owning_team(), TEAM);
    }

    #[tokio::test]
    async fn test_graphql_not_found_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "Schedule not found"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).get_schedule_v2(1).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
