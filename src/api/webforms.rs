//! Webform endpoints (REST v3). Wire types mirror the platform's JSON.
#![allow(missing_docs)]

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{nullable, Client};
use crate::error::ProviderError;

/// A webform as returned by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Webform {
    #[serde(deserialize_with = "nullable")]
    pub id: u64,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(rename = "owner_id", deserialize_with = "nullable")]
    pub team_id: String,
    #[serde(deserialize_with = "nullable")]
    pub owner_type: String,
    #[serde(deserialize_with = "nullable")]
    pub host_name: String,
    #[serde(deserialize_with = "nullable")]
    pub is_cname: bool,
    #[serde(deserialize_with = "nullable")]
    pub public_url: String,
    #[serde(deserialize_with = "nullable")]
    pub is_all_services: bool,
    #[serde(deserialize_with = "nullable")]
    pub form_owner_type: String,
    #[serde(deserialize_with = "nullable")]
    pub form_owner_id: String,
    #[serde(deserialize_with = "nullable")]
    pub form_owner_name: String,
    #[serde(deserialize_with = "nullable")]
    pub header: String,
    #[serde(deserialize_with = "nullable")]
    pub title: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub footer_text: String,
    #[serde(deserialize_with = "nullable")]
    pub footer_link: String,
    #[serde(deserialize_with = "nullable")]
    pub email_on: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub incident_count: i64,
    #[serde(deserialize_with = "nullable")]
    pub mttr: i64,
    #[serde(deserialize_with = "nullable")]
    pub tags: BTreeMap<String, String>,
    #[serde(deserialize_with = "nullable")]
    pub services: Vec<WebformService>,
    #[serde(deserialize_with = "nullable")]
    pub severity: Vec<WebformSeverity>,
}

/// A service attached to a webform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebformService {
    #[serde(deserialize_with = "nullable")]
    pub service_id: String,
    #[serde(deserialize_with = "nullable")]
    pub webform_id: u64,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub alias: String,
}

/// A service reference sent when creating or updating a webform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebformServiceRef {
    pub service_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,
}

/// A severity choice offered by a webform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebformSeverity {
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub severity_type: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
}

/// Create and update payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebformRequest {
    pub name: String,
    #[serde(rename = "owner_id")]
    pub team_id: String,
    pub form_owner_type: String,
    pub form_owner_id: String,
    pub form_owner_name: String,
    pub host_name: String,
    pub is_cname: bool,
    pub header: String,
    pub title: String,
    pub description: String,
    pub footer_text: String,
    pub footer_link: String,
    pub email_on: Vec<String>,
    pub services: Vec<WebformServiceRef>,
    pub severity: Vec<WebformSeverity>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CreatedWebform {
    webform: Webform,
}

impl Client {
    pub async fn create_webform(
        &self,
        team_id: &str,
        request: &WebformRequest,
    ) -> Result<Webform, ProviderError> {
        info!(team_id, name = %request.name, "Creating webform");
        let created: CreatedWebform = self
            .request(Method::POST, "/webform", &[("owner_id", team_id)], Some(request))
            .await?;
        Ok(created.webform)
    }

    pub async fn get_webform(&self, team_id: &str, id: &str) -> Result<Webform, ProviderError> {
        self.request::<(), _>(
            Method::GET,
            &format!("/webform/{}", id),
            &[("owner_id", team_id)],
            None,
        )
        .await
    }

    pub async fn update_webform(
        &self,
        team_id: &str,
        id: &str,
        request: &WebformRequest,
    ) -> Result<(), ProviderError> {
        info!(team_id, id, "Updating webform");
        self.request_unit(
            Method::PUT,
            &format!("/webform/{}", id),
            &[("owner_id", team_id)],
            Some(request),
        )
        .await
    }

    pub async fn delete_webform(&self, team_id: &str, id: &str) -> Result<(), ProviderError> {
        info!(team_id, id, "Deleting webform");
        self.request_unit::<()>(
            Method::DELETE,
            &format!("/webform/{}", id),
            &[("owner_id", team_id)],
            None,
        )
        .await
    }
}
