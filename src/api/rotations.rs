//! Schedule rotation endpoints (GraphQL).
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{nullable, Client, Operation};
use crate::error::ProviderError;

/// A rotation as returned by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rotation {
    #[serde(rename = "ID", deserialize_with = "nullable")]
    pub id: i64,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub color: String,
    #[serde(deserialize_with = "nullable")]
    pub participant_groups: Vec<ParticipantGroup>,
    #[serde(deserialize_with = "nullable")]
    pub start_date: String,
    #[serde(deserialize_with = "nullable")]
    pub period: String,
    #[serde(deserialize_with = "nullable")]
    pub shift_time_slots: Vec<Timeslot>,
    pub custom_period: Option<CustomPeriod>,
    #[serde(deserialize_with = "nullable")]
    pub change_participants_frequency: i64,
    #[serde(deserialize_with = "nullable")]
    pub change_participants_unit: String,
    pub end_date: Option<String>,
    pub ends_after_iterations: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantGroup {
    #[serde(deserialize_with = "nullable")]
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "std::ops::Not::not", deserialize_with = "nullable")]
    pub everyone: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Participant {
    #[serde(rename = "ID", alias = "id", deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub participant_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeslot {
    #[serde(deserialize_with = "nullable")]
    pub start_hour: i64,
    #[serde(deserialize_with = "nullable")]
    pub start_minute: i64,
    #[serde(deserialize_with = "nullable")]
    pub duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomPeriod {
    #[serde(deserialize_with = "nullable")]
    pub period_frequency: i64,
    #[serde(deserialize_with = "nullable")]
    pub period_unit: String,
}

/// Create and update input for rotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationInput {
    pub name: String,
    pub start_date: String,
    pub period: String,
    pub shift_time_slots: Vec<Timeslot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_period_frequency: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_period_unit: Option<String>,
    pub change_participants_frequency: i64,
    pub change_participants_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_after_iterations: Option<i64>,
    pub participant_groups: Vec<ParticipantGroup>,
}

const ROTATION_SELECTION: &str = "ID name color startDate period \
     participantGroups { everyone participants { ID type } } \
     shiftTimeSlots { startHour startMinute duration dayOfWeek } \
     customPeriod { periodFrequency periodUnit } \
     changeParticipantsFrequency changeParticipantsUnit endDate endsAfterIterations";

#[derive(Debug, Default, Deserialize)]
struct ScheduleRotations {
    #[serde(default, deserialize_with = "nullable")]
    rotations: Vec<Rotation>,
}

impl Client {
    pub async fn get_rotation(&self, id: i64) -> Result<Rotation, ProviderError> {
        let op = Operation::query("rotation")
            .argument("ID", "Int!", json!(id))
            .select(ROTATION_SELECTION);
        self.graphql(&op).await
    }

    /// All rotations of a v2 schedule.
    pub async fn list_rotations(&self, schedule_id: i64) -> Result<Vec<Rotation>, ProviderError> {
        let op = Operation::query("schedule")
            .argument("ID", "Int!", json!(schedule_id))
            .select(&format!("rotations {{ {} }}", ROTATION_SELECTION));
        let schedule: ScheduleRotations = self.graphql(&op).await?;
        Ok(schedule.rotations)
    }

    /// Resolve a rotation from its team, schedule name and rotation name.
    ///
    /// Returns the owning schedule id alongside the rotation.
    pub async fn get_rotation_by_name(
        &self,
        team_id: &str,
        schedule_name: &str,
        rotation_name: &str,
    ) -> Result<(i64, Rotation), ProviderError> {
        let schedule = self.get_schedule_v2_by_name(team_id, schedule_name).await?;
        let rotation = self
            .list_rotations(schedule.id)
            .await?
            .into_iter()
            .find(|r| r.name == rotation_name)
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "could not find a rotation with name `{}` in schedule `{}`",
                    rotation_name, schedule_name
                ))
            })?;
        Ok((schedule.id, rotation))
    }

    pub async fn create_rotation(
        &self,
        schedule_id: i64,
        input: &RotationInput,
    ) -> Result<Rotation, ProviderError> {
        info!(schedule_id, name = %input.name, "Creating rotation");
        let op = Operation::mutation("createRotation")
            .argument("scheduleID", "Int!", json!(schedule_id))
            .argument("input", "CreateRotationInput!", serde_json::to_value(input)?)
            .select(ROTATION_SELECTION);
        self.graphql(&op).await
    }

    pub async fn update_rotation(
        &self,
        id: i64,
        input: &RotationInput,
    ) -> Result<Rotation, ProviderError> {
        info!(id, name = %input.name, "Updating rotation");
        let op = Operation::mutation("updateRotation")
            .argument("ID", "Int!", json!(id))
            .argument("input", "UpdateRotationInput!", serde_json::to_value(input)?)
            .select(ROTATION_SELECTION);
        self.graphql(&op).await
    }

    pub async fn delete_rotation(&self, id: i64) -> Result<(), ProviderError> {
        info!(id, "Deleting rotation");
        let op = Operation::mutation("deleteRotation")
            .argument("ID", "Int!", json!(id))
            .select("ID");
        let _: Value = self.graphql(&op).await?;
        Ok(())
    }
}
