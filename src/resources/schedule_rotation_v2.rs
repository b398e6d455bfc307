//! `squadcast_schedule_rotation_v2`: shift patterns inside a v2 schedule.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{absent_if_not_found, non_empty, parse_import_id3, Resource};
use crate::api::{
    parse_numeric_id, Client, Participant, ParticipantGroup, Rotation, RotationInput, Timeslot,
};
use crate::codec::{decode, encode};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema, Validator};

/// The `squadcast_schedule_rotation_v2` resource.
pub struct ScheduleRotationV2;

const CUSTOM: &str = "custom";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RotationState {
    id: Option<String>,
    schedule_id: Option<i64>,
    name: String,
    participant_groups: Vec<GroupState>,
    start_date: String,
    period: String,
    shift_timeslots: Vec<SlotState>,
    custom_period_frequency: Option<i64>,
    custom_period_unit: Option<String>,
    change_participants_frequency: i64,
    change_participants_unit: String,
    end_date: Option<String>,
    ends_after_iterations: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct GroupState {
    participants: Vec<ParticipantState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ParticipantState {
    #[serde(rename = "type")]
    participant_type: String,
    id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SlotState {
    start_hour: i64,
    start_minute: i64,
    duration: i64,
    day_of_week: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RotationKey {
    id: Option<String>,
    schedule_id: Option<i64>,
}

impl RotationState {
    fn from_api(rotation: Rotation, schedule_id: Option<i64>) -> Self {
        let (custom_period_frequency, custom_period_unit) = match rotation.custom_period {
            Some(custom) => (
                Some(custom.period_frequency),
                non_empty(custom.period_unit),
            ),
            None => (None, None),
        };

        Self {
            id: Some(rotation.id.to_string()),
            schedule_id,
            name: rotation.name,
            participant_groups: rotation
                .participant_groups
                .into_iter()
                .map(|g| GroupState {
                    participants: g
                        .participants
                        .into_iter()
                        .map(|p| ParticipantState {
                            participant_type: p.participant_type,
                            id: p.id,
                        })
                        .collect(),
                })
                .collect(),
            start_date: rotation.start_date,
            period: rotation.period,
            shift_timeslots: rotation
                .shift_time_slots
                .into_iter()
                .map(|s| SlotState {
                    start_hour: s.start_hour,
                    start_minute: s.start_minute,
                    duration: s.duration,
                    day_of_week: s.day_of_week.and_then(non_empty),
                })
                .collect(),
            custom_period_frequency,
            custom_period_unit,
            change_participants_frequency: rotation.change_participants_frequency,
            change_participants_unit: rotation.change_participants_unit,
            end_date: rotation.end_date.and_then(non_empty),
            ends_after_iterations: rotation.ends_after_iterations,
        }
    }

    /// Cross-field rules on period, timeslots and the custom period settings.
    ///
    /// Returns the offending attribute and a message.
    fn period_violation(&self) -> Option<(&'static str, &'static str)> {
        let custom = self.period == CUSTOM;
        let frequency = self.custom_period_frequency.unwrap_or(0);
        let unit = self.custom_period_unit.as_deref().unwrap_or("");

        if !custom && self.shift_timeslots.len() > 1 {
            return Some((
                "shift_timeslots",
                "multiple shift_timeslots can only be set when period is custom",
            ));
        }
        match (custom, frequency != 0, !unit.is_empty()) {
            (true, false, _) => Some((
                "custom_period_frequency",
                "custom_period_frequency must be set when period is custom",
            )),
            (true, _, false) => Some((
                "custom_period_unit",
                "custom_period_unit must be set when period is custom",
            )),
            (false, true, _) => Some((
                "custom_period_frequency",
                "custom_period_frequency can only be set when period is custom",
            )),
            (false, _, true) => Some((
                "custom_period_unit",
                "custom_period_unit can only be set when period is custom",
            )),
            _ => None,
        }
    }

    fn to_input(&self) -> Result<RotationInput, ProviderError> {
        if let Some((_, message)) = self.period_violation() {
            return Err(ProviderError::Validation(message.to_string()));
        }

        let custom = self.period == CUSTOM;
        Ok(RotationInput {
            name: self.name.clone(),
            start_date: self.start_date.clone(),
            period: self.period.clone(),
            shift_time_slots: self
                .shift_timeslots
                .iter()
                .map(|s| Timeslot {
                    start_hour: s.start_hour,
                    start_minute: s.start_minute,
                    duration: s.duration,
                    day_of_week: s.day_of_week.clone(),
                })
                .collect(),
            custom_period_frequency: self.custom_period_frequency.filter(|_| custom),
            custom_period_unit: self.custom_period_unit.clone().filter(|_| custom),
            change_participants_frequency: self.change_participants_frequency,
            change_participants_unit: self.change_participants_unit.clone(),
            end_date: self.end_date.clone(),
            ends_after_iterations: self.ends_after_iterations,
            participant_groups: self
                .participant_groups
                .iter()
                .map(|g| ParticipantGroup {
                    participants: g
                        .participants
                        .iter()
                        .map(|p| Participant {
                            id: p.id.clone(),
                            participant_type: p.participant_type.clone(),
                        })
                        .collect(),
                    everyone: false,
                })
                .collect(),
        })
    }

    fn schedule_id(&self) -> Result<i64, ProviderError> {
        self.schedule_id
            .ok_or_else(|| ProviderError::Validation("schedule_id is required".to_string()))
    }
}

impl ScheduleRotationV2 {
    fn to_state(
        &self,
        rotation: Rotation,
        schedule_id: Option<i64>,
    ) -> Result<Value, ProviderError> {
        encode(&self.schema().block, &RotationState::from_api(rotation, schedule_id))
    }

    fn key(&self, state: &Value) -> Result<(Option<i64>, Option<i64>), ProviderError> {
        let key: RotationKey = decode(&self.schema().block, state)?;
        let id = key
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| parse_numeric_id("rotation", id))
            .transpose()?;
        Ok((id, key.schedule_id))
    }
}

#[async_trait]
impl Resource for ScheduleRotationV2 {
    fn type_name(&self) -> &'static str {
        "squadcast_schedule_rotation_v2"
    }

    fn schema(&self) -> Schema {
        let participant = Block::new()
            .with_description("Group participant.")
            .with_attribute(
                "type",
                Attribute::required_string()
                    .one_of(&["user", "squad", "team"])
                    .with_description("Participant type (user, team, squad)."),
            )
            .with_attribute(
                "id",
                Attribute::required_string()
                    .with_validator(Validator::ObjectId)
                    .with_description("Participant id."),
            );

        let timeslot = Block::new()
            .with_attribute(
                "start_hour",
                Attribute::required_int64()
                    .with_validator(Validator::IntBetween(0, 23))
                    .with_description("Start hour of each shift in the schedule time zone."),
            )
            .with_attribute(
                "start_minute",
                Attribute::required_int64()
                    .with_validator(Validator::IntBetween(0, 59))
                    .with_description("Start minute of each shift in the schedule time zone."),
            )
            .with_attribute(
                "duration",
                Attribute::required_int64()
                    .with_validator(Validator::IntBetween(1, 1440))
                    .with_description("Shift duration in minutes."),
            )
            .with_attribute(
                "day_of_week",
                Attribute::optional_string()
                    .one_of(&[
                        "monday",
                        "tuesday",
                        "wednesday",
                        "thursday",
                        "friday",
                        "saturday",
                        "sunday",
                    ])
                    .with_description("Day of the week of the shift. Unset means every day."),
            );

        Schema::v0()
            .with_description("Rotations define who is on call and when within a schedule.")
            .with_attribute("id", Attribute::computed_string().with_description("Rotation id."))
            .with_attribute(
                "schedule_id",
                Attribute::required_int64()
                    .with_force_new()
                    .with_description("Id of the schedule the rotation belongs to."),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_validator(Validator::StringLength(1, 150))
                    .with_description("Rotation name."),
            )
            .with_attribute(
                "start_date",
                Attribute::required_string().with_description("Start date of the rotation."),
            )
            .with_attribute(
                "period",
                Attribute::required_string()
                    .one_of(&["none", "daily", "weekly", "monthly", CUSTOM])
                    .with_description("How often the rotation repeats."),
            )
            .with_attribute(
                "custom_period_frequency",
                Attribute::optional_int64()
                    .with_description("Repeat frequency. Only valid when period is custom."),
            )
            .with_attribute(
                "custom_period_unit",
                Attribute::optional_string()
                    .one_of(&["day", "week", "month"])
                    .with_description("Repeat unit. Only valid when period is custom."),
            )
            .with_attribute(
                "change_participants_frequency",
                Attribute::required_int64()
                    .with_description("How often participants change in the rotation."),
            )
            .with_attribute(
                "change_participants_unit",
                Attribute::required_string()
                    .one_of(&["rotation", "day", "week", "month"])
                    .with_description("Unit of change_participants_frequency."),
            )
            .with_attribute(
                "end_date",
                Attribute::optional_string().with_description("End date of the rotation."),
            )
            .with_attribute(
                "ends_after_iterations",
                Attribute::optional_int64()
                    .with_description("Number of iterations after which the rotation ends."),
            )
            .with_block(
                "participant_groups",
                NestedBlock::list(
                    Block::new()
                        .with_description(
                            "Ordered participant groups, cycled through on every rotation.",
                        )
                        .with_block("participants", NestedBlock::list(participant)),
                ),
            )
            .with_block("shift_timeslots", NestedBlock::list(timeslot).with_min_items(1))
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let state: RotationState = match decode(&self.schema().block, config) {
            Ok(state) => state,
            Err(e) => return vec![Diagnostic::error(e.message())],
        };
        match state.period_violation() {
            Some((attribute, message)) => {
                vec![Diagnostic::error(message).with_attribute(attribute)]
            },
            None => Vec::new(),
        }
    }

    async fn create(&self, client: &Client, planned: &Value) -> Result<Value, ProviderError> {
        let state: RotationState = decode(&self.schema().block, planned)?;
        let schedule_id = state.schedule_id()?;
        let created = client.create_rotation(schedule_id, &state.to_input()?).await?;
        info!(id = created.id, schedule_id, "Rotation created");
        self.to_state(created, Some(schedule_id))
    }

    async fn read(&self, client: &Client, current: &Value) -> Result<Option<Value>, ProviderError> {
        let (Some(id), schedule_id) = self.key(current)? else {
            return Ok(None);
        };
        match absent_if_not_found(client.get_rotation(id).await)? {
            Some(rotation) => self.to_state(rotation, schedule_id).map(Some),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let (id, _) = self.key(prior)?;
        let id = id
            .ok_or_else(|| ProviderError::FailedPrecondition("rotation has no id".to_string()))?;
        let state: RotationState = decode(&self.schema().block, planned)?;

        let updated = client.update_rotation(id, &state.to_input()?).await?;
        self.to_state(updated, state.schedule_id)
    }

    async fn delete(&self, client: &Client, current: &Value) -> Result<(), ProviderError> {
        let (Some(id), _) = self.key(current)? else {
            return Ok(());
        };
        match client.delete_rotation(id).await {
            Err(e) if e.is_not_found() => {
                info!(id, "Rotation already deleted");
                Ok(())
            },
            other => other,
        }
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Value, ProviderError> {
        let (team_id, schedule_name, rotation_name) = parse_import_id3(id)?;
        let (schedule_id, rotation) = client
            .get_rotation_by_name(team_id, schedule_name, rotation_name)
            .await?;
        self.to_state(rotation, Some(schedule_id))
    }
}
